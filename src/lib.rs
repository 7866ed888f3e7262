pub mod appresult;
pub mod auth;
pub mod cache;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod members;
pub mod model;
pub mod mutate;
pub mod policy;
pub mod profiles;
pub mod res;
pub mod session;

use serde_json::Value;

pub use appresult::{AppError, AppResult};
pub use context::AppContext;
pub use error::RpcError;

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
    fn get_obj_field(&self, field: &str) -> AppResult<&Value>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get_obj_field(field)?
            .as_str()
            .ok_or(format!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_obj_field(&self, field: &str) -> AppResult<&Value> {
        self.get(field)
        .ok_or(format!("expected {field} in {self}").into())
    }
}
