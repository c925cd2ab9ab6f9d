//! The strand server: routes, CGI-style scripts and WebSocket endpoints on top of `strand-http`.
//!
//! ```no_run
//! use strand_web::{Server, cgi};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder().address("127.0.0.1:8080").router(cgi::routes()?).build()?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

mod body;
mod server;

pub mod cgi;
pub mod router;

pub use body::ResponseBody;
pub use router::Router;
pub use server::{Server, ServerBuildError, ServerBuilder};
