//! # indi-xml
//!
//! XML element handling for the INDI wire protocol.
//!
//! INDI traffic is a stream of top-level XML elements with no enclosing
//! document, so a connection needs a parser that can be fed bytes as they
//! arrive and tells it when an element is complete. This crate provides:
//!
//! - [`XmlFramer`]: per-connection incremental framer, fed one byte at a time
//! - [`Element`]: the parsed tree (tag, attributes, children, text)
//! - [`Element::to_xml`]: serialization back to wire form
//!
//! ## Usage
//!
//! ```rust
//! use indi_xml::XmlFramer;
//!
//! let mut framer = XmlFramer::new();
//! let mut done = Vec::new();
//! for chunk in [&b"<getProperties vers"[..], &b"ion='1.7'/>"[..]] {
//!     for result in framer.feed(chunk) {
//!         done.push(result.unwrap());
//!     }
//! }
//! assert_eq!(done[0].tag(), "getProperties");
//! assert_eq!(done[0].attr("version"), Some("1.7"));
//! ```

pub mod element;
pub mod error;
pub mod framer;

pub use element::Element;
pub use error::{XmlError, XmlResult};
pub use framer::XmlFramer;
