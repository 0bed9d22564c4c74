pub mod prediction_log;
