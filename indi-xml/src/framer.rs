//! Incremental element framing for XML byte streams.
//!
//! INDI peers write an endless sequence of top-level elements with no
//! enclosing document. [`XmlFramer`] is fed one byte at a time, tracks tag
//! nesting, and hands back a parsed [`Element`] each time a top-level element
//! closes. One framer belongs to one connection; framers share no state.

use crate::element::Element;
use crate::error::{XmlError, XmlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between top-level elements; stray bytes are dropped
    Idle,
    /// Just read `<`
    TagOpen,
    /// Inside a start, end or empty tag
    InTag {
        closing: bool,
        quote: Option<u8>,
        last: u8,
    },
    /// Inside `<?...?>` or `<!...>`
    Directive,
    /// Inside `<!-- ... -->`
    Comment,
    /// Character data between child tags
    Content,
}

/// Byte-at-a-time framer yielding complete top-level elements.
#[derive(Debug)]
pub struct XmlFramer {
    state: State,
    depth: usize,
    buffer: Vec<u8>,
}

impl Default for XmlFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlFramer {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            depth: 0,
            buffer: Vec::new(),
        }
    }

    /// Consume one byte.
    ///
    /// Returns `Some` when the byte completes a top-level element, either
    /// parsed or as the error that made it unusable. After an error the
    /// framer is back between elements and ready for the next one.
    pub fn push_byte(&mut self, byte: u8) -> Option<XmlResult<Element>> {
        match self.state {
            State::Idle => {
                if byte == b'<' {
                    self.buffer.clear();
                    self.buffer.push(byte);
                    self.state = State::TagOpen;
                }
                None
            }
            State::Content => {
                self.buffer.push(byte);
                if byte == b'<' {
                    self.state = State::TagOpen;
                }
                None
            }
            State::TagOpen => {
                self.buffer.push(byte);
                self.state = match byte {
                    b'/' => State::InTag {
                        closing: true,
                        quote: None,
                        last: byte,
                    },
                    b'?' | b'!' => State::Directive,
                    _ => State::InTag {
                        closing: false,
                        quote: None,
                        last: byte,
                    },
                };
                None
            }
            State::Directive => {
                self.buffer.push(byte);
                if self.buffer.ends_with(b"<!--") {
                    self.state = State::Comment;
                } else if byte == b'>' {
                    self.end_directive();
                }
                None
            }
            State::Comment => {
                self.buffer.push(byte);
                if self.buffer.ends_with(b"-->") {
                    self.end_directive();
                }
                None
            }
            State::InTag {
                closing,
                quote,
                last,
            } => {
                self.buffer.push(byte);
                match quote {
                    Some(q) => {
                        let quote = if byte == q { None } else { Some(q) };
                        self.state = State::InTag {
                            closing,
                            quote,
                            last: byte,
                        };
                        None
                    }
                    None if byte == b'>' => self.end_tag(closing, last == b'/'),
                    None => {
                        let quote = (byte == b'"' || byte == b'\'').then_some(byte);
                        self.state = State::InTag {
                            closing,
                            quote,
                            last: byte,
                        };
                        None
                    }
                }
            }
        }
    }

    /// Consume a chunk, returning every element it completed in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<XmlResult<Element>> {
        bytes.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    /// Current element nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Bytes held for the element in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial element.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.depth = 0;
        self.buffer.clear();
    }

    fn end_directive(&mut self) {
        if self.depth == 0 {
            self.buffer.clear();
            self.state = State::Idle;
        } else {
            self.state = State::Content;
        }
    }

    fn end_tag(&mut self, closing: bool, self_closing: bool) -> Option<XmlResult<Element>> {
        if closing {
            if self.depth == 0 {
                self.reset();
                return Some(Err(XmlError::UnexpectedCloseTag));
            }
            self.depth -= 1;
        } else if !self_closing {
            self.depth += 1;
        }

        if self.depth > 0 {
            self.state = State::Content;
            return None;
        }

        let bytes = std::mem::take(&mut self.buffer);
        self.state = State::Idle;
        Some(Element::from_bytes(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elements(framer: &mut XmlFramer, input: &str) -> Vec<Element> {
        framer
            .feed(input.as_bytes())
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_self_closing_element() {
        let mut framer = XmlFramer::new();
        let out = elements(&mut framer, "<getProperties version='1.7'/>");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag(), "getProperties");
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_nested_element_completes_on_outer_close() {
        let mut framer = XmlFramer::new();
        let input = "<defSwitchVector device='Mount' name='PARK'><defSwitch name='PARK'>Off</defSwitch>";
        assert!(framer.feed(input.as_bytes()).is_empty());
        assert_eq!(framer.depth(), 1);

        let out = elements(&mut framer, "</defSwitchVector>");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].children()[0].text(), "Off");
        assert_eq!(framer.depth(), 0);
    }

    #[test]
    fn test_gt_inside_quoted_attribute() {
        let mut framer = XmlFramer::new();
        let out = elements(&mut framer, r#"<message device="x" message="a > b"/>"#);
        assert_eq!(out[0].attr("message"), Some("a > b"));
    }

    #[test]
    fn test_multiple_elements_in_one_chunk() {
        let mut framer = XmlFramer::new();
        let out = elements(
            &mut framer,
            "<enableBLOB>Also</enableBLOB>\n<getProperties/>\n<delProperty device='CCD'/>",
        );
        let tags: Vec<_> = out.iter().map(|e| e.tag().to_string()).collect();
        assert_eq!(tags, ["enableBLOB", "getProperties", "delProperty"]);
    }

    #[test]
    fn test_declaration_and_comments_are_skipped() {
        let mut framer = XmlFramer::new();
        let out = elements(
            &mut framer,
            "<?xml version='1.0'?><!-- boot --><setTextVector device='a'><!-- x > y --><oneText name='t'>v</oneText></setTextVector>",
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].children().len(), 1);
    }

    #[test]
    fn test_stray_close_tag_reports_error_and_recovers() {
        let mut framer = XmlFramer::new();
        let results = framer.feed(b"</oops><getProperties/>");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(XmlError::UnexpectedCloseTag));
        assert_eq!(results[1].as_ref().unwrap().tag(), "getProperties");
    }

    #[test]
    fn test_mismatched_close_tag_is_error() {
        let mut framer = XmlFramer::new();
        let results = framer.feed(b"<a><b></c></a>");
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(framer.depth(), 0);
    }

    #[test]
    fn test_reset_discards_partial_element() {
        let mut framer = XmlFramer::new();
        framer.feed(b"<setNumberVector device='x'><oneNumber");
        assert!(framer.buffered() > 0);
        framer.reset();
        assert_eq!(framer.buffered(), 0);
        assert_eq!(elements(&mut framer, "<getProperties/>").len(), 1);
    }
}
