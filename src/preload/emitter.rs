use indexmap::IndexMap;
use std::fmt::Display;

use super::{Packet, PacketError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapMode {
    ExpectKeyMarker,
    ExpectKeyName,
    ExpectValueMarker,
    ExpectValueNode,
}

#[derive(Debug)]
enum Frame {
    Map {
        entries: IndexMap<String, Packet>,
        pending_key: Option<String>,
        mode: MapMode,
    },
    Seq {
        items: Vec<Packet>,
    },
}

/// Event-stream builder for preload documents.
///
/// Usage mirrors a streaming YAML emitter: open a map, alternate
/// `key()` + key scalar and `value()` + value node, close containers
/// in order, then take the finished [`Packet`] with `finish()`.
/// Misplaced events make the emitter sticky-bad; `assert_valid`
/// reports that without requiring the document to be complete yet.
#[derive(Debug, Default)]
pub struct PreloadEmitter {
    stack: Vec<Frame>,
    root: Option<Packet>,
    bad: Option<&'static str>,
}

impl PreloadEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_map(&mut self) {
        if !self.node_position_ok() {
            return;
        }
        self.stack.push(Frame::Map {
            entries: IndexMap::new(),
            pending_key: None,
            mode: MapMode::ExpectKeyMarker,
        });
    }

    pub fn end_map(&mut self) {
        match self.stack.pop() {
            Some(Frame::Map {
                entries,
                mode: MapMode::ExpectKeyMarker,
                ..
            }) => self.place(Packet::Map(entries)),
            Some(frame) => {
                // Preserve stack depth for subsequent diagnostics
                self.stack.push(frame);
                self.mark_bad("EndMap with a pending key or inside a sequence");
            }
            None => self.mark_bad("EndMap without a matching BeginMap"),
        }
    }

    pub fn begin_seq(&mut self) {
        if !self.node_position_ok() {
            return;
        }
        self.stack.push(Frame::Seq { items: Vec::new() });
    }

    pub fn end_seq(&mut self) {
        match self.stack.pop() {
            Some(Frame::Seq { items }) => self.place(Packet::List(items)),
            Some(frame) => {
                self.stack.push(frame);
                self.mark_bad("EndSeq inside a map");
            }
            None => self.mark_bad("EndSeq without a matching BeginSeq"),
        }
    }

    /// Announce that the next scalar names a map key.
    pub fn key(&mut self) {
        match self.stack.last_mut() {
            Some(Frame::Map { mode, .. }) if *mode == MapMode::ExpectKeyMarker => {
                *mode = MapMode::ExpectKeyName;
            }
            _ => self.mark_bad("misplaced Key"),
        }
    }

    /// Announce that the next node is the pending key's value.
    pub fn value(&mut self) {
        match self.stack.last_mut() {
            Some(Frame::Map { mode, .. }) if *mode == MapMode::ExpectValueMarker => {
                *mode = MapMode::ExpectValueNode;
            }
            _ => self.mark_bad("misplaced Value"),
        }
    }

    /// Emit a scalar: a key name after `key()`, a value after
    /// `value()`, or a sequence element.
    pub fn scalar<T: Display>(&mut self, value: T) {
        if self.bad.is_some() {
            return;
        }
        let text = value.to_string();
        if let Some(Frame::Map {
            pending_key, mode, ..
        }) = self.stack.last_mut()
        {
            if *mode == MapMode::ExpectKeyName {
                *pending_key = Some(text);
                *mode = MapMode::ExpectValueMarker;
                return;
            }
        }
        if self.node_position_ok() {
            self.place(Packet::Scalar(text));
        }
    }

    /// Emit an already-built packet wholesale.
    pub fn packet(&mut self, packet: Packet) {
        if self.node_position_ok() {
            self.place(packet);
        }
    }

    /// The stream is still well formed (containers may be open).
    pub fn assert_valid(&self) -> Result<(), PacketError> {
        match self.bad {
            Some(why) => Err(PacketError::IncompleteDocument(why)),
            None => Ok(()),
        }
    }

    /// Close out the stream and return the document.
    pub fn finish(self) -> Result<Packet, PacketError> {
        self.assert_valid()?;
        if !self.stack.is_empty() {
            return Err(PacketError::IncompleteDocument(
                "unclosed map or sequence; missing EndMap/EndSeq",
            ));
        }
        self.root
            .ok_or(PacketError::IncompleteDocument("no data was emitted"))
    }

    fn mark_bad(&mut self, why: &'static str) {
        if self.bad.is_none() {
            self.bad = Some(why);
        }
    }

    /// Whether a node (scalar/map/seq) may start here.
    fn node_position_ok(&mut self) -> bool {
        if self.bad.is_some() {
            return false;
        }
        match self.stack.last() {
            Some(Frame::Map { mode, .. }) => {
                if *mode == MapMode::ExpectValueNode {
                    true
                } else {
                    self.mark_bad("node emitted into a map without Key/Value markers");
                    false
                }
            }
            Some(Frame::Seq { .. }) => true,
            None => {
                if self.root.is_none() {
                    true
                } else {
                    self.mark_bad("multiple root nodes");
                    false
                }
            }
        }
    }

    /// Attach a completed node to its parent.
    fn place(&mut self, packet: Packet) {
        match self.stack.last_mut() {
            Some(Frame::Map {
                entries,
                pending_key,
                mode,
            }) => match pending_key.take() {
                Some(key) => {
                    entries.insert(key, packet);
                    *mode = MapMode::ExpectKeyMarker;
                }
                None => self.mark_bad("value placed into a map without a key"),
            },
            Some(Frame::Seq { items }) => items.push(packet),
            None => self.root = Some(packet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_named_list_of_maps() {
        let mut emitter = PreloadEmitter::new();
        emitter.begin_map();
        emitter.key();
        emitter.scalar("lines");
        emitter.value();
        emitter.begin_seq();
        for i in 0..2 {
            emitter.begin_map();
            emitter.key();
            emitter.scalar("va");
            emitter.value();
            emitter.scalar(format!("{:#x}", 0x1000 * (i + 1)));
            emitter.end_map();
        }
        emitter.end_seq();
        emitter.end_map();

        let doc = emitter.finish().unwrap();
        let lines = doc.get_list("lines").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].get_scalar::<u64>("va").unwrap(), 0x1000);
        assert_eq!(lines[1].get_scalar::<u64>("va").unwrap(), 0x2000);
    }

    #[test]
    fn unclosed_sequence_is_reported() {
        let mut emitter = PreloadEmitter::new();
        emitter.begin_map();
        emitter.key();
        emitter.scalar("lines");
        emitter.value();
        emitter.begin_seq();
        assert!(emitter.assert_valid().is_ok()); // not bad, just open
        assert!(matches!(
            emitter.finish(),
            Err(PacketError::IncompleteDocument(_))
        ));
    }

    #[test]
    fn misplaced_key_is_sticky() {
        let mut emitter = PreloadEmitter::new();
        emitter.begin_seq();
        emitter.key(); // keys have no place in a sequence
        assert!(emitter.assert_valid().is_err());
        emitter.end_seq();
        assert!(emitter.finish().is_err());
    }

    #[test]
    fn packet_wholesale_emission() {
        let mut emitter = PreloadEmitter::new();
        emitter.begin_seq();
        let mut entry = IndexMap::new();
        entry.insert("a".to_owned(), Packet::Scalar("x".to_owned()));
        emitter.packet(Packet::Map(entry));
        emitter.end_seq();
        let doc = emitter.finish().unwrap();
        assert_eq!(doc.get_list_root().unwrap().len(), 1);
    }
}
