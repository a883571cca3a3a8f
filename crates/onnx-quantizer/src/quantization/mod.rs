mod bias;
mod calibration;
mod compute;
mod config;
mod opset;
mod overrides;
mod params;
mod qtype;
mod quantizer;
mod weight;

pub use bias::*;
pub use calibration::*;
pub use compute::*;
pub use config::*;
pub use opset::*;
pub use overrides::*;
pub use params::*;
pub use qtype::*;
pub use quantizer::*;
pub use weight::*;
