//! In-memory tables rebuilt from the colon-delimited schema files at
//! open time. All pair reconstruction runs against these.

use std::collections::HashMap;

use super::record::PairFormat;
use super::Error;

/// Shape of one pair type: field names, byte widths, type codes and
/// display formats. Position 0 is always the synthetic `pairid` field
/// (2 bytes, integer, decimal).
#[derive(Debug, Clone)]
pub struct PairSchema {
    /// Field count including the synthetic field.
    pub length: u16,
    pub names: Vec<String>,
    pub sizes: Vec<u16>,
    pub types: Vec<u16>,
    pub formats: Vec<PairFormat>,
}

impl PairSchema {
    fn with_declared_fields(declared: u16) -> Self {
        let length = declared + 1;
        let mut schema = Self {
            length,
            names: Vec::with_capacity(length as usize),
            sizes: Vec::with_capacity(length as usize),
            types: Vec::with_capacity(length as usize),
            formats: Vec::with_capacity(length as usize),
        };
        schema.names.push("pairid".to_owned());
        schema.sizes.push(2);
        schema.types.push(0);
        schema.formats.push(PairFormat::Decimal);
        schema
    }
}

/// The three lookup structures backing pair reconstruction plus the
/// location routing table.
#[derive(Debug, Clone, Default)]
pub struct SchemaTables {
    /// LocationID -> PairID
    pub loc_map: HashMap<u32, u16>,
    /// PairID -> schema
    pub pair_schemas: HashMap<u16, PairSchema>,
    /// (PairID, FieldIndex, IntegerValue) -> display string. Field
    /// indices here do not count the synthetic field.
    pub string_map: HashMap<(u64, u64, u64), String>,
}

fn parse_field<T: std::str::FromStr>(
    field: &str,
    file: &'static str,
    line: usize,
) -> Result<T, Error> {
    field
        .trim()
        .parse()
        .map_err(|_| Error::BadTable { file, line })
}

/// Split a newline-terminated record into `:`-delimited fields.
/// A trailing empty field is dropped; unknown trailing fields are the
/// caller's to ignore.
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields: Vec<&str> = line.split(':').collect();
    if fields.last() == Some(&"") {
        fields.pop();
    }
    fields
}

impl SchemaTables {
    /// Build every table from the file contents.
    pub fn parse(
        map_text: &str,
        data_text: &str,
        format_text: &str,
        string_text: &str,
    ) -> Result<Self, Error> {
        let mut tables = Self::default();
        tables.parse_loc_map(map_text)?;
        tables.parse_pair_schemas(data_text)?;
        tables.parse_formats(format_text)?;
        tables.parse_string_map(string_text)?;
        Ok(tables)
    }

    /// `map.dat`: `LocationID:PairID` per line.
    fn parse_loc_map(&mut self, text: &str) -> Result<(), Error> {
        const FILE: &str = "map.dat";
        for (lineno, line) in non_empty_lines(text) {
            let fields = split_fields(line);
            if fields.len() < 2 {
                return Err(Error::BadTable { file: FILE, line: lineno });
            }
            let location: u32 = parse_field(fields[0], FILE, lineno)?;
            let pair_id: u16 = parse_field(fields[1], FILE, lineno)?;
            self.loc_map.insert(location, pair_id);
        }
        Ok(())
    }

    /// `data.dat`: `PairID:FieldCount(:name:size:type)*` per line.
    fn parse_pair_schemas(&mut self, text: &str) -> Result<(), Error> {
        const FILE: &str = "data.dat";
        for (lineno, line) in non_empty_lines(text) {
            let fields = split_fields(line);
            if fields.len() < 2 {
                return Err(Error::BadTable { file: FILE, line: lineno });
            }
            let pair_id: u16 = parse_field(fields[0], FILE, lineno)?;
            let declared: u16 = parse_field(fields[1], FILE, lineno)?;
            let mut schema = PairSchema::with_declared_fields(declared);
            for triple in fields[2..].chunks_exact(3) {
                schema.names.push(triple[0].to_owned());
                schema.sizes.push(parse_field(triple[1], FILE, lineno)?);
                schema.types.push(parse_field(triple[2], FILE, lineno)?);
            }
            if schema.names.len() != schema.length as usize {
                return Err(Error::BadTable { file: FILE, line: lineno });
            }
            self.pair_schemas.insert(pair_id, schema);
        }
        Ok(())
    }

    /// `display_format.dat`: `PairID:(format-code)*` per line, one
    /// code per declared field.
    fn parse_formats(&mut self, text: &str) -> Result<(), Error> {
        const FILE: &str = "display_format.dat";
        for (lineno, line) in non_empty_lines(text) {
            let fields = split_fields(line);
            if fields.is_empty() {
                continue;
            }
            let pair_id: u16 = parse_field(fields[0], FILE, lineno)?;
            let schema = self
                .pair_schemas
                .get_mut(&pair_id)
                .ok_or(Error::BadTable { file: FILE, line: lineno })?;
            for field in &fields[1..] {
                let code: u16 = parse_field(field, FILE, lineno)?;
                let format = PairFormat::try_from(code)
                    .map_err(|_| Error::BadTable { file: FILE, line: lineno })?;
                schema.formats.push(format);
            }
            if schema.formats.len() != schema.length as usize {
                return Err(Error::BadTable { file: FILE, line: lineno });
            }
        }
        Ok(())
    }

    /// `string_map.dat`: `PairID:FieldIndex:IntValue:display-string`
    /// per line. The display string ends at the next `:` or the end of
    /// the line.
    fn parse_string_map(&mut self, text: &str) -> Result<(), Error> {
        const FILE: &str = "string_map.dat";
        for (lineno, line) in non_empty_lines(text) {
            let fields = split_fields(line);
            if fields.len() < 4 {
                return Err(Error::BadTable { file: FILE, line: lineno });
            }
            let pair_id: u64 = parse_field(fields[0], FILE, lineno)?;
            let field_idx: u64 = parse_field(fields[1], FILE, lineno)?;
            let value: u64 = parse_field(fields[2], FILE, lineno)?;
            self.string_map
                .insert((pair_id, field_idx, value), fields[3].to_owned());
        }
        Ok(())
    }
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !l.trim().is_empty())
}
