pub mod app;
pub mod config;
pub mod core;
pub mod logging;
pub mod persistence;
pub mod provider;
pub mod records;
pub mod srs;
pub mod store;
pub mod sync;
pub mod vocab;

pub use app::{
    App,
    AppState,
};
pub use config::AppConfig;
pub use core::TutorError;
pub use store::LocalStore;
