//! # openrec-dl
//!
//! This crate provides a library and command-line tool for downloading videos
//! from [OPENREC.tv](https://www.openrec.tv), along with their metadata,
//! thumbnails and live chat replays.
//!
//! ## Usage
//!
//! Each reference goes through a short pipeline: it is normalized to a movie
//! ID, resolved through the site API, one HLS format is selected, the segments
//! are downloaded into an MPEG-TS file and finally remuxed into MP4 with
//! ffmpeg. The following example downloads the best format of a single video
//! into the current directory.
//!
//! ```rust,no_run
//! use openrec_dl::{
//!     api::OpenrecSite, downloader::SegmentDownloader, ffmpeg::Ffmpeg,
//!     pipeline::{Options, Pipeline}, util,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     // HttpClient wraps reqwest::Client with a cookie store and a middleware
//!     // for retrying transient errors
//!     let client = util::HttpClient::new().unwrap();
//!
//!     // No credentials, so only public videos can be downloaded
//!     let site = OpenrecSite::new(&client, None);
//!     let fetcher = SegmentDownloader::new(&client, 1);
//!     let converter = Ffmpeg::default();
//!
//!     let options = Options::default();
//!     let mut pipeline = Pipeline::new(&site, &fetcher, &converter, &options, None);
//!     let failures = pipeline.run(&["https://www.openrec.tv/live/..."]).await;
//!     assert_eq!(failures, 0);
//! }
//! ```
//!
//! Every component the pipeline talks to sits behind a trait
//! ([`api::Site`], [`downloader::Fetch`] and [`ffmpeg::Converter`]), so the
//! network and the external converter can be swapped out.

#![forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod api;
pub mod archive;
pub mod auth;
pub mod cli;
pub mod downloader;
pub mod error;
#[cfg(test)]
mod fake;
pub mod ffmpeg;
pub mod pipeline;
pub mod playlist;
pub mod reference;
pub mod selector;
pub mod sidecar;
pub mod stats;
pub mod util;
