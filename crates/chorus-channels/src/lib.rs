pub mod base;
pub mod hub;
pub mod web;

pub use base::Channel;
pub use hub::ViewerHub;
pub use web::WebChannel;
