use indexmap::IndexMap;
use std::{error, fmt};

pub mod emitter;
pub mod preloader;
mod yaml;

pub use self::emitter::PreloadEmitter;
pub use self::preloader::{Preloadable, Preloader};

/// Preload descriptor errors
#[derive(Debug, Clone)]
pub enum PacketError {
    MissingKey(String),
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },
    BadScalar {
        value: String,
        target: &'static str,
    },
    IncompleteDocument(&'static str),
    Yaml(String),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey(key) => write!(f, "packet does not have key `{key}`"),
            Self::WrongKind { expected, found } => {
                write!(f, "expected a {expected} node, found a {found} node")
            }
            Self::BadScalar { value, target } => {
                write!(f, "cannot read scalar `{value}` as {target}")
            }
            Self::IncompleteDocument(why) => {
                write!(f, "emitter holds an incomplete set of data: {why}")
            }
            Self::Yaml(err) => write!(f, "yaml: {err}"),
        }
    }
}

impl error::Error for PacketError {}

/// A node in a hierarchical preload descriptor: a lexical scalar, a
/// keyed map, or an ordered list. Packets are produced by a concrete
/// parser (YAML by convention, see [`Packet::from_yaml_str`]) or by a
/// [`PreloadEmitter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Scalar(String),
    Map(IndexMap<String, Packet>),
    List(Vec<Packet>),
}

impl Packet {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Map(_) => "map",
            Self::List(_) => "list",
        }
    }

    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        match self {
            Self::Map(map) => map.contains_key(key),
            _ => false,
        }
    }

    fn lookup(&self, key: &str) -> Result<&Packet, PacketError> {
        match self {
            Self::Map(map) => map
                .get(key)
                .ok_or_else(|| PacketError::MissingKey(key.to_owned())),
            other => Err(PacketError::WrongKind {
                expected: "map",
                found: other.kind_name(),
            }),
        }
    }

    /// Extract the value for `key`, lexically cast to `T`.
    pub fn get_scalar<T: FromPacketScalar>(&self, key: &str) -> Result<T, PacketError> {
        match self.lookup(key)? {
            Self::Scalar(value) => T::from_scalar(value),
            other => Err(PacketError::WrongKind {
                expected: "scalar",
                found: other.kind_name(),
            }),
        }
    }

    /// The nested map stored under `key`.
    pub fn get_map(&self, key: &str) -> Result<&Packet, PacketError> {
        let node = self.lookup(key)?;
        match node {
            Self::Map(_) => Ok(node),
            other => Err(PacketError::WrongKind {
                expected: "map",
                found: other.kind_name(),
            }),
        }
    }

    /// The list stored under `key`.
    pub fn get_list(&self, key: &str) -> Result<&[Packet], PacketError> {
        match self.lookup(key)? {
            Self::List(items) => Ok(items),
            other => Err(PacketError::WrongKind {
                expected: "list",
                found: other.kind_name(),
            }),
        }
    }

    /// This packet itself as a list of nodes.
    pub fn get_list_root(&self) -> Result<&[Packet], PacketError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(PacketError::WrongKind {
                expected: "list",
                found: other.kind_name(),
            }),
        }
    }

    /// Key/value iteration for map packets, in document order.
    pub fn entries(&self) -> Result<indexmap::map::Iter<'_, String, Packet>, PacketError> {
        match self {
            Self::Map(map) => Ok(map.iter()),
            other => Err(PacketError::WrongKind {
                expected: "map",
                found: other.kind_name(),
            }),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Lexical cast from a scalar packet value. Integer targets accept
/// decimal and `0x`/`0X` hex forms.
pub trait FromPacketScalar: Sized {
    fn from_scalar(value: &str) -> Result<Self, PacketError>;
}

fn parse_unsigned(value: &str, target: &'static str) -> Result<u64, PacketError> {
    let trimmed = value.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else {
        trimmed.parse().ok()
    };
    parsed.ok_or_else(|| PacketError::BadScalar {
        value: value.to_owned(),
        target,
    })
}

fn parse_signed(value: &str, target: &'static str) -> Result<i64, PacketError> {
    let trimmed = value.trim();
    if let Some(rest) = trimmed.strip_prefix('-') {
        let magnitude = parse_unsigned(rest, target)?;
        i64::try_from(magnitude)
            .map(|m| -m)
            .map_err(|_| PacketError::BadScalar {
                value: value.to_owned(),
                target,
            })
    } else {
        let magnitude = parse_unsigned(trimmed, target)?;
        i64::try_from(magnitude).map_err(|_| PacketError::BadScalar {
            value: value.to_owned(),
            target,
        })
    }
}

impl FromPacketScalar for u64 {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        parse_unsigned(value, "u64")
    }
}

impl FromPacketScalar for u32 {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        parse_unsigned(value, "u32")?
            .try_into()
            .map_err(|_| PacketError::BadScalar {
                value: value.to_owned(),
                target: "u32",
            })
    }
}

impl FromPacketScalar for u16 {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        parse_unsigned(value, "u16")?
            .try_into()
            .map_err(|_| PacketError::BadScalar {
                value: value.to_owned(),
                target: "u16",
            })
    }
}

impl FromPacketScalar for u8 {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        parse_unsigned(value, "u8")?
            .try_into()
            .map_err(|_| PacketError::BadScalar {
                value: value.to_owned(),
                target: "u8",
            })
    }
}

impl FromPacketScalar for usize {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        parse_unsigned(value, "usize")?
            .try_into()
            .map_err(|_| PacketError::BadScalar {
                value: value.to_owned(),
                target: "usize",
            })
    }
}

impl FromPacketScalar for i64 {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        parse_signed(value, "i64")
    }
}

impl FromPacketScalar for i32 {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        parse_signed(value, "i32")?
            .try_into()
            .map_err(|_| PacketError::BadScalar {
                value: value.to_owned(),
                target: "i32",
            })
    }
}

impl FromPacketScalar for bool {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        match value.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(PacketError::BadScalar {
                value: value.to_owned(),
                target: "bool",
            }),
        }
    }
}

impl FromPacketScalar for f64 {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        value.trim().parse().map_err(|_| PacketError::BadScalar {
            value: value.to_owned(),
            target: "f64",
        })
    }
}

impl FromPacketScalar for String {
    fn from_scalar(value: &str) -> Result<Self, PacketError> {
        Ok(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::from_yaml_str(
            "a: a\n\
             c: c\n\
             nested_data:\n\
             \x20   z: 100\n\
             \x20   deep_list:\n\
             \x20       - a: 0\n\
             \x20       - a: 1\n\
             \x20       - a: 2\n",
        )
        .unwrap()
    }

    #[test]
    fn scalar_map_and_list_access() {
        let pkt = sample();
        assert!(pkt.has_key("c"));
        assert!(pkt.has_key("nested_data"));
        assert_eq!(pkt.get_scalar::<String>("a").unwrap(), "a");

        let nested = pkt.get_map("nested_data").unwrap();
        assert_eq!(nested.get_scalar::<u32>("z").unwrap(), 100);

        let list = nested.get_list("deep_list").unwrap();
        assert_eq!(list.len(), 3);
        for (i, node) in list.iter().enumerate() {
            assert_eq!(node.get_scalar::<i32>("a").unwrap(), i as i32);
        }
    }

    #[test]
    fn unknown_keys_are_typed_errors() {
        let pkt = sample();
        assert!(matches!(
            pkt.get_scalar::<u64>("missing"),
            Err(PacketError::MissingKey(_))
        ));
        assert!(matches!(
            pkt.get_map("a"),
            Err(PacketError::WrongKind { .. })
        ));
        assert!(matches!(
            pkt.get_list_root(),
            Err(PacketError::WrongKind { .. })
        ));
    }

    #[test]
    fn hex_scalars_cast() {
        let pkt = Packet::from_yaml_str("va: \"0x1000\"\nval: 0xfffff\nneg: -12\n").unwrap();
        assert_eq!(pkt.get_scalar::<u64>("va").unwrap(), 0x1000);
        assert_eq!(pkt.get_scalar::<u64>("val").unwrap(), 0xfffff);
        assert_eq!(pkt.get_scalar::<i64>("neg").unwrap(), -12);
        assert!(pkt.get_scalar::<u8>("val").is_err());
    }
}
