pub mod middleware;
pub mod password;
pub mod sessions;
pub mod tokens;
