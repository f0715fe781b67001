//! Bridge between the abstract packet tree and its conventional YAML
//! wire format.

use indexmap::IndexMap;

use super::{Packet, PacketError};

fn yaml_err(err: impl ToString) -> PacketError {
    PacketError::Yaml(err.to_string())
}

fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn from_value(value: &serde_yaml::Value) -> Result<Packet, PacketError> {
    match value {
        serde_yaml::Value::Sequence(seq) => {
            let items = seq.iter().map(from_value).collect::<Result<_, _>>()?;
            Ok(Packet::List(items))
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = IndexMap::with_capacity(mapping.len());
            for (key, val) in mapping {
                let key = scalar_text(key)
                    .ok_or_else(|| yaml_err("mapping keys must be scalars"))?;
                map.insert(key, from_value(val)?);
            }
            Ok(Packet::Map(map))
        }
        serde_yaml::Value::Tagged(tagged) => from_value(&tagged.value),
        scalar => scalar_text(scalar)
            .map(Packet::Scalar)
            .ok_or_else(|| yaml_err("unsupported yaml node")),
    }
}

fn to_value(packet: &Packet) -> serde_yaml::Value {
    match packet {
        Packet::Scalar(s) => serde_yaml::Value::String(s.clone()),
        Packet::Map(map) => {
            let mut mapping = serde_yaml::Mapping::with_capacity(map.len());
            for (key, val) in map {
                mapping.insert(serde_yaml::Value::String(key.clone()), to_value(val));
            }
            serde_yaml::Value::Mapping(mapping)
        }
        Packet::List(items) => {
            serde_yaml::Value::Sequence(items.iter().map(to_value).collect())
        }
    }
}

impl Packet {
    /// Parse a YAML document into a packet tree. Scalars keep their
    /// lexical form and are cast on access.
    pub fn from_yaml_str(text: &str) -> Result<Self, PacketError> {
        let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(yaml_err)?;
        from_value(&value)
    }

    /// Serialize the packet tree back to YAML. Scalars are emitted as
    /// strings, which re-parse to the same tree.
    pub fn to_yaml_string(&self) -> Result<String, PacketError> {
        serde_yaml::to_string(&to_value(self)).map_err(yaml_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dump_reparse_is_stable() {
        let text = "top.cache1:\n\
                    \x20   lines:\n\
                    \x20       - va: 0x1000\n\
                    \x20         data: abc\n\
                    \x20       - va: 0x2000\n\
                    \x20         data: bde\n";
        let first = Packet::from_yaml_str(text).unwrap();
        let second = Packet::from_yaml_str(&first.to_yaml_string().unwrap()).unwrap();
        assert_eq!(first, second);

        // List order survives the trip
        let lines = first.get_map("top.cache1").unwrap().get_list("lines").unwrap();
        assert_eq!(lines[0].get_scalar::<String>("data").unwrap(), "abc");
        assert_eq!(lines[1].get_scalar::<String>("data").unwrap(), "bde");
    }

    #[test]
    fn null_and_bool_scalars() {
        let pkt = Packet::from_yaml_str("a: true\nb:\n").unwrap();
        assert!(pkt.get_scalar::<bool>("a").unwrap());
        assert_eq!(pkt.get_scalar::<String>("b").unwrap(), "");
    }
}
