use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use serde_json::json;
use shared::{ErrorResponse, FeedbackRequest, HealthResponse};
use std::path::PathBuf;

use crate::error::{PipelineError, UploadRejection};
use crate::model::InferenceError;
use crate::pipeline::validator::UploadedImage;
use crate::state::AppState;
use crate::storage::prediction_log::PredictionLog;

pub const IMAGE_ID_HEADER: &str = "x-image-id";
const UPLOAD_FIELD: &str = "file";

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: Option<PathBuf>) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/feedback").route(web::post().to(feedback)));
    if let Some(dir) = static_dir {
        cfg.service(Files::new("/static", dir).index_file("index.html"));
    }
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "message": "API running" }))
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let pipeline = &state.pipeline;
    let ready = pipeline.is_ready();
    let body = HealthResponse {
        status: if ready { "healthy" } else { "unhealthy" }.to_string(),
        model_loaded: ready,
        num_classes: pipeline.num_classes(),
        error: pipeline.unavailable_reason().map(str::to_string),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn predict(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, PipelineError> {
    if let Some(reason) = state.pipeline.unavailable_reason() {
        return Err(PipelineError::ModelUnavailable(reason.to_string()));
    }

    let max_bytes = state.pipeline.validator().max_bytes();
    let upload = read_upload(payload, max_bytes).await.inspect_err(|e| {
        warn!("Rejected upload: {}", e);
    })?;
    let image_id = PredictionLog::image_id(&upload.bytes);
    let file_name = upload.display_name().to_string();
    info!(
        "Received {} ({} bytes) as image {}",
        file_name,
        upload.len(),
        image_id
    );

    let pipeline = state.pipeline.clone();
    let journal = state.prediction_log.clone();
    let block_image_id = image_id.clone();
    let result = web::block(move || {
        let result = pipeline.run(&upload)?;
        if let Some(journal) = journal {
            if let Err(e) =
                journal.record_prediction(&block_image_id, &result.predicted_class, result.confidence)
            {
                error!("Failed to journal prediction for {}: {}", block_image_id, e);
            }
        }
        Ok::<_, PipelineError>(result)
    })
    .await
    .map_err(|e| PipelineError::Inference(InferenceError::Backend(e.to_string())))?;

    let result = result.inspect_err(|e| {
        if e.is_client_error() {
            warn!("Rejected {} (image {}): {}", file_name, image_id, e);
        } else {
            error!("Prediction failed for image {}: {}", image_id, e);
        }
    })?;

    info!(
        "Predicted {} (confidence {:.4}) for image {}",
        result.predicted_class, result.confidence, image_id
    );
    Ok(HttpResponse::Ok()
        .insert_header((IMAGE_ID_HEADER, image_id))
        .json(result))
}

/// Reads the first file field, aborting as soon as it grows past `max_bytes`.
async fn read_upload(
    mut payload: Multipart,
    max_bytes: usize,
) -> Result<UploadedImage, UploadRejection> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| UploadRejection::Malformed(e.to_string()))?
    {
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);
        if field.name() != Some(UPLOAD_FIELD) && file_name.is_none() {
            continue;
        }
        let content_type = field.content_type().map(|mime| mime.essence_str().to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| UploadRejection::Malformed(e.to_string()))?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(UploadRejection::TooLarge { limit: max_bytes });
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(UploadedImage {
            bytes,
            content_type,
            file_name,
        });
    }
    Err(UploadRejection::MissingFile)
}

async fn feedback(state: web::Data<AppState>, body: web::Json<FeedbackRequest>) -> HttpResponse {
    let Some(journal) = state.prediction_log.clone() else {
        return HttpResponse::ServiceUnavailable().json(ErrorResponse {
            detail: "Feedback logging is disabled".into(),
        });
    };
    let feedback = body.into_inner();
    if feedback.image_id.trim().is_empty() || feedback.user_feedback.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            detail: "image_id and user_feedback are required".into(),
        });
    }

    let image_id = feedback.image_id.clone();
    match web::block(move || journal.record_feedback(&feedback)).await {
        Ok(Ok(())) => {
            info!("Recorded feedback for image {}", image_id);
            HttpResponse::Created().json(json!({ "status": "recorded" }))
        }
        Ok(Err(e)) => {
            error!("Failed to record feedback for {}: {}", image_id, e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                detail: "Failed to record feedback".into(),
            })
        }
        Err(e) => {
            error!("Feedback worker failed: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                detail: "Failed to record feedback".into(),
            })
        }
    }
}
