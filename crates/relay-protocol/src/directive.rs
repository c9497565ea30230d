//! Classification of inbound client lines.

/// Marker that turns a line into a private-message directive.
pub const PRIVATE_PREFIX: char = '@';

/// What a single inbound line asks the server to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    /// Free text for every other connected client.
    Broadcast(&'a str),
    /// `@<target> <text>`: deliver `text` to `target` only.
    Private { target: &'a str, text: &'a str },
    /// A line starting with `@` that has no space separating target and text.
    MalformedPrivate,
}

impl<'a> Directive<'a> {
    /// Classify one line (already stripped of its newline).
    ///
    /// The target runs from after the `@` up to the first space; everything
    /// after that space is the text, further spaces included.
    pub fn parse(line: &'a str) -> Self {
        let Some(rest) = line.strip_prefix(PRIVATE_PREFIX) else {
            return Self::Broadcast(line);
        };

        match rest.split_once(' ') {
            Some((target, text)) => Self::Private { target, text },
            None => Self::MalformedPrivate,
        }
    }
}
