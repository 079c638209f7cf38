mod domain;
pub use domain::{action, config, document};

pub mod collection;
pub mod dirs;
pub mod index;
pub mod rpc;
pub mod scheduler;
pub mod service;

mod node;
pub use node::Node;

mod server;
pub use server::{RpcGateway, dispatch};
