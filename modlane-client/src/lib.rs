//! Client side of the Modlane status channel.
//!
//! UI processes use [`StatusChannelClient`] to follow the worker's current
//! task and conversion progress and to answer file selection requests.
//!
//! ```no_run
//! use modlane_client::{ClientEvent, StatusChannelClient};
//!
//! # async fn run() -> modlane_client::ClientResult<()> {
//! let client = StatusChannelClient::connect(47_810).await?;
//! let mut events = client.events();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ClientEvent::FileSelectionRequested { endpoint, task_id, files, .. } => {
//!             client
//!                 .respond_to_file_selection(&endpoint, task_id, files)
//!                 .await?;
//!         }
//!         ClientEvent::Message { message, .. } => println!("{}", message.message),
//!         ClientEvent::Closed { .. } => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;

pub use client::{ClientEvent, StatusChannelClient};
pub use error::{ClientError, ClientResult};
