//! Public entry point of the SDK.
//!
//! - [`DtsClient`] - listens for rows across every discovered server
//! - [`ClientBuilder`] - resolves configuration into a running client
//!
//! # Basic Usage
//! ```no_run
//! use std::time::Duration;
//!
//! use dts_sdk::ClientBuilder;
//! use dts_sdk::SdkConfig;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = SdkConfig::new().unwrap();
//!     let client = ClientBuilder::new(config).build().await.unwrap();
//!
//!     // Resolves once the row shows up in the change stream.
//!     let response = client
//!         .listen_row("orders", 42, Some(Duration::from_secs(1)))
//!         .await
//!         .unwrap();
//!     println!("observed after {:?}", response.cost());
//!
//!     client.shutdown().await;
//! }
//! ```

mod builder;
mod dts_client;

pub use builder::*;
pub use dts_client::*;
