pub mod health;
pub mod message;
pub mod product;
pub mod publish;
pub mod response;
pub mod retry;
pub mod stats;
pub mod status;
pub mod subscription;
