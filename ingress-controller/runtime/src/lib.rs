#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use h2_ingress_core as core;
pub use h2_ingress_k8s_api as k8s;
pub use h2_ingress_k8s_index as index;
pub use h2_ingress_k8s_status as status;

mod args;
mod file_manager;
mod worker;

pub use self::{args::Args, file_manager::FileManager};
