use ndarray::Array4;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tch::nn::{self, ModuleT};
use tch::vision::resnet;
use tch::{CModule, Device, Kind, TchError, Tensor};

use super::{Classifier, InferenceError, ModelLoadError, TorchWeights};

enum Network {
    Script(CModule),
    ResNet18 {
        _vs: nn::VarStore,
        net: nn::FuncT<'static>,
    },
}

/// libtorch-backed network: a TorchScript module, or a ResNet-18 with a
/// `num_classes` head filled from a `VarStore` checkpoint or a `state_dict`.
pub struct TorchClassifier {
    network: Mutex<Network>,
    device: Device,
    input_size: i64,
    num_classes: usize,
}

impl TorchClassifier {
    pub fn load(path: &Path, input_size: u32, num_classes: usize) -> Result<Self, ModelLoadError> {
        let device = Device::cuda_if_available();
        let backend_err = |e: TchError| ModelLoadError::Backend(format!("{}: {}", path.display(), e));

        let network = match TorchWeights::from_path(path) {
            TorchWeights::VarStore => {
                resnet18(device, num_classes, |vs| vs.load(path)).map_err(backend_err)?
            }
            TorchWeights::StateDict => {
                match resnet18(device, num_classes, |vs| load_state_dict(vs, path, device)) {
                    Ok(network) => network,
                    Err(e) => {
                        log::warn!(
                            "{} is not a ResNet-18 state dict ({}), trying TorchScript",
                            path.display(),
                            e
                        );
                        script(path, device).map_err(backend_err)?
                    }
                }
            }
            TorchWeights::Script => script(path, device).map_err(backend_err)?,
        };
        log::info!("Torch model placed on {:?}", device);

        Ok(Self {
            network: Mutex::new(network),
            device,
            input_size: input_size as i64,
            num_classes,
        })
    }
}

fn resnet18<F>(device: Device, num_classes: usize, fill: F) -> Result<Network, TchError>
where
    F: FnOnce(&mut nn::VarStore) -> Result<(), TchError>,
{
    let mut vs = nn::VarStore::new(device);
    let net = resnet::resnet18(&vs.root(), num_classes as i64);
    fill(&mut vs)?;
    Ok(Network::ResNet18 { _vs: vs, net })
}

fn script(path: &Path, device: Device) -> Result<Network, TchError> {
    let mut module = CModule::load_on_device(path, device)?;
    module.set_eval();
    Ok(Network::Script(module))
}

/// Copies a pickled `state_dict` into the store. Extra entries such as
/// `num_batches_tracked` are ignored; a missing parameter is an error.
fn load_state_dict(vs: &nn::VarStore, path: &Path, device: Device) -> Result<(), TchError> {
    let state: HashMap<String, Tensor> = Tensor::loadz_multi_with_device(path, device)?
        .into_iter()
        .collect();
    let mut variables = vs.variables();
    tch::no_grad(|| {
        for (name, var) in variables.iter_mut() {
            let src = state.get(name).ok_or_else(|| {
                TchError::TensorNameNotFound(name.clone(), path.display().to_string())
            })?;
            var.f_copy_(src)?;
        }
        Ok(())
    })
}

impl Classifier for TorchClassifier {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_slice(&data)
            .view([1, 3, self.input_size, self.input_size])
            .to_device(self.device);

        let network = self
            .network
            .lock()
            .map_err(|_| InferenceError::Backend("model lock poisoned".into()))?;
        let output = tch::no_grad(|| match &*network {
            Network::Script(module) => module.forward_ts(&[tensor]),
            Network::ResNet18 { net, .. } => Ok(net.forward_t(&tensor, false)),
        })
        .map_err(|e| InferenceError::Backend(e.to_string()))?;

        let output_flat = output
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}
