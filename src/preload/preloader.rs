use log::debug;

use super::emitter::PreloadEmitter;
use super::{Packet, PacketError};

/// An entity that can absorb preload data and dump its current
/// contents back out.
pub trait Preloadable {
    /// Load the packet. Returns whether the packet was consumed.
    fn preload_packet(&mut self, packet: &Packet) -> Result<bool, PacketError>;

    /// Emit current contents, conventionally as a sequence of maps
    /// under a named list.
    fn preload_dump(&self, emitter: &mut PreloadEmitter) -> Result<(), PacketError>;
}

/// Glob match with `*` matching any (possibly empty) run of
/// characters within a path segment.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    // Classic backtracking wildcard match
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star, mut mark) = (usize::MAX, 0usize);
    while t < txt.len() {
        if p < pat.len() && (pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = p;
            mark = t;
            p += 1;
        } else if star != usize::MAX {
            p = star + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

/// Whether a dot-separated entity path matches a dot-separated
/// pattern. Segments pair up positionally; `*` wildcards apply within
/// a segment.
fn path_matches(pattern: &str, path: &str) -> bool {
    let mut pat_segs = pattern.split('.');
    let mut path_segs = path.split('.');
    loop {
        match (pat_segs.next(), path_segs.next()) {
            (None, None) => return true,
            (Some(p), Some(s)) => {
                if !glob_match(p, s) {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// Routes preload packets to registered entities by path pattern, and
/// walks the registry to dump an equivalent document back out.
#[derive(Default)]
pub struct Preloader {
    targets: Vec<(String, Box<dyn Preloadable>)>,
}

impl Preloader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity under its tree path, e.g.
    /// `top.core0.lsu.l1cache`. Registration order is dump order.
    pub fn register(&mut self, path: impl Into<String>, target: Box<dyn Preloadable>) {
        self.targets.push((path.into(), target));
    }

    #[must_use]
    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    /// Deliver one packet to every entity whose path matches
    /// `pattern` (`top.core*.l1cache` style). Returns how many
    /// entities consumed it.
    pub fn load_packet(&mut self, pattern: &str, packet: &Packet) -> Result<u32, PacketError> {
        let mut consumed = 0;
        for (path, target) in &mut self.targets {
            if path_matches(pattern, path) {
                debug!("preloading {path}: {packet}");
                if target.preload_packet(packet)? {
                    consumed += 1;
                }
            }
        }
        Ok(consumed)
    }

    /// Load a whole document: a map of path pattern to packet.
    pub fn load_document(&mut self, doc: &Packet) -> Result<u32, PacketError> {
        let mut consumed = 0;
        for (pattern, packet) in doc.entries()? {
            consumed += self.load_packet(pattern, packet)?;
        }
        Ok(consumed)
    }

    /// Parse a YAML document and load it.
    pub fn load_yaml(&mut self, text: &str) -> Result<u32, PacketError> {
        let doc = Packet::from_yaml_str(text)?;
        self.load_document(&doc)
    }

    /// Dump every registered entity, in registration order, to a
    /// document equivalent to the one parsed in.
    pub fn dump_document(&self) -> Result<Packet, PacketError> {
        let mut emitter = PreloadEmitter::new();
        emitter.begin_map();
        for (path, target) in &self.targets {
            debug!("dumping preload contents of {path}");
            emitter.key();
            emitter.scalar(path);
            emitter.value();
            target.preload_dump(&mut emitter)?;
            emitter.assert_valid()?;
        }
        emitter.end_map();
        emitter.finish()
    }

    pub fn dump_yaml(&self) -> Result<String, PacketError> {
        self.dump_document()?.to_yaml_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn glob_and_path_matching() {
        assert!(path_matches("top.core0.l1cache", "top.core0.l1cache"));
        assert!(path_matches("top.core*.l1cache", "top.core0.l1cache"));
        assert!(path_matches("top.core*.l1cache", "top.core15.l1cache"));
        assert!(path_matches("top.*.l1cache", "top.core0.l1cache"));
        assert!(!path_matches("top.core*.l1cache", "top.core0.l2cache"));
        assert!(!path_matches("top.core*", "top.core0.l1cache"));
        assert!(!path_matches("top.core0.l1cache.x", "top.core0.l1cache"));
        assert!(glob_match("c*he*", "caches"));
        assert!(!glob_match("c*he", "caches"));
    }

    /// Entity that remembers the `va` scalars it was fed and dumps
    /// them back under a `lines` list.
    struct RecordingTarget {
        seen: Rc<RefCell<Vec<u64>>>,
    }

    impl Preloadable for RecordingTarget {
        fn preload_packet(&mut self, packet: &Packet) -> Result<bool, PacketError> {
            for node in packet.get_list("lines")? {
                self.seen.borrow_mut().push(node.get_scalar::<u64>("va")?);
            }
            Ok(true)
        }

        fn preload_dump(&self, emitter: &mut PreloadEmitter) -> Result<(), PacketError> {
            emitter.begin_map();
            emitter.key();
            emitter.scalar("lines");
            emitter.value();
            emitter.begin_seq();
            for va in self.seen.borrow().iter() {
                emitter.begin_map();
                emitter.key();
                emitter.scalar("va");
                emitter.value();
                emitter.scalar(va);
                emitter.end_map();
            }
            emitter.end_seq();
            emitter.end_map();
            Ok(())
        }
    }

    #[test]
    fn wildcard_delivery_and_round_trip() {
        let doc_text = "top.core*.l1cache:\n\
                        \x20   lines:\n\
                        \x20       - va: 4096\n\
                        \x20       - va: 8192\n";

        let mut preloader = Preloader::new();
        let seen0 = Rc::new(RefCell::new(Vec::new()));
        let seen1 = Rc::new(RefCell::new(Vec::new()));
        preloader.register(
            "top.core0.l1cache",
            Box::new(RecordingTarget {
                seen: seen0.clone(),
            }),
        );
        preloader.register(
            "top.core1.l1cache",
            Box::new(RecordingTarget {
                seen: seen1.clone(),
            }),
        );

        let consumed = preloader.load_yaml(doc_text).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(*seen0.borrow(), vec![4096, 8192]);
        assert_eq!(*seen1.borrow(), vec![4096, 8192]);

        // Dump, reparse, dump again: the parsed trees must agree.
        let dumped = preloader.dump_yaml().unwrap();
        let first = Packet::from_yaml_str(&dumped).unwrap();
        let lines = first
            .get_map("top.core0.l1cache")
            .unwrap()
            .get_list("lines")
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].get_scalar::<u64>("va").unwrap(), 8192);

        let second = Packet::from_yaml_str(
            &first.to_yaml_string().unwrap(),
        )
        .unwrap();
        assert_eq!(first, second);
    }
}
