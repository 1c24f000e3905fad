use anyhow::Context;
use osmpbf::{BlobDecode, BlobReader, Element, RelMemberType};
use serde::Deserialize;
use serde_json::json;
use smap_core::{parse_options, ConfigError, Decoder, MapError, Record, RecordIter, SourceFormat, Value};
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Entity kinds to emit. When the option is given, kinds left out are skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OsmTypes {
    pub node: bool,
    pub way: bool,
    pub relation: bool,
}

/// Options accepted by the `osm` format
///
/// ```yaml
/// options:
///   format: pbf
///   types: { node: true, way: true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OsmOptions {
    /// Input encoding; only `pbf` is supported
    pub format: String,
    pub types: Option<OsmTypes>,
}

impl Default for OsmOptions {
    fn default() -> Self {
        Self {
            format: "pbf".into(),
            types: None,
        }
    }
}

pub struct OsmFormat;

impl SourceFormat for OsmFormat {
    fn name(&self) -> &str {
        "osm"
    }

    fn configure(&self, options: &Value) -> Result<Box<dyn Decoder>, ConfigError> {
        let options: OsmOptions = parse_options(self.name(), options)?;
        if options.format != "pbf" {
            return Err(ConfigError::InvalidOptions {
                format: self.name().into(),
                reason: format!("unsupported encoding `{}`, expected `pbf`", options.format),
            });
        }
        let types = options.types.unwrap_or(OsmTypes {
            node: true,
            way: true,
            relation: true,
        });
        Ok(Box::new(OsmDecoder { types }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OsmDecoder {
    types: OsmTypes,
}

impl Decoder for OsmDecoder {
    fn open(&self, path: &Path) -> Result<RecordIter, MapError> {
        let blobs = BlobReader::from_path(path)
            .with_context(|| format!("open {}", path.display()))
            .map_err(|e| MapError::source_io(path, e))?;
        Ok(Box::new(OsmRecords {
            path: path.to_path_buf(),
            types: self.types,
            blobs,
            block: VecDeque::new(),
        }))
    }
}

/// Entities of one PBF file. Blobs are decoded one at a time; the records of
/// the current primitive block are the only buffered data.
struct OsmRecords {
    path: PathBuf,
    types: OsmTypes,
    blobs: BlobReader<BufReader<File>>,
    block: VecDeque<Record>,
}

impl Iterator for OsmRecords {
    type Item = Result<Record, MapError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.block.pop_front() {
                return Some(Ok(record));
            }

            let blob = match self.blobs.next()? {
                Ok(blob) => blob,
                Err(e) => return Some(Err(MapError::source_io(&self.path, e))),
            };
            match blob.decode() {
                Ok(BlobDecode::OsmData(block)) => {
                    let types = self.types;
                    self.block
                        .extend(block.elements().filter_map(|el| element_record(types, el)));
                }
                Ok(_) => {}
                Err(e) => return Some(Err(MapError::source_io(&self.path, e))),
            }
        }
    }
}

fn tags<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Value {
    Value::Object(
        pairs
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect(),
    )
}

fn node(id: i64, lat: f64, lon: f64, tags: Value) -> Record {
    entity(json!({ "type": "node", "id": id, "lat": lat, "lon": lon, "tags": tags }))
}

fn entity(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn member_type(kind: &RelMemberType) -> &'static str {
    match kind {
        RelMemberType::Node => "node",
        RelMemberType::Way => "way",
        RelMemberType::Relation => "relation",
    }
}

fn element_record(types: OsmTypes, element: Element<'_>) -> Option<Record> {
    match element {
        Element::Node(n) if types.node => Some(node(n.id(), n.lat(), n.lon(), tags(n.tags()))),
        Element::DenseNode(n) if types.node => {
            Some(node(n.id(), n.lat(), n.lon(), tags(n.tags())))
        }
        Element::Way(w) if types.way => Some(entity(json!({
            "type": "way",
            "id": w.id(),
            "refs": w.refs().collect::<Vec<i64>>(),
            "tags": tags(w.tags()),
        }))),
        Element::Relation(r) if types.relation => {
            let members: Vec<Value> = r
                .members()
                .map(|m| {
                    json!({
                        "type": member_type(&m.member_type),
                        "ref": m.member_id,
                        "role": m.role().unwrap_or_default(),
                    })
                })
                .collect();
            Some(entity(json!({
                "type": "relation",
                "id": r.id(),
                "members": members,
                "tags": tags(r.tags()),
            })))
        }
        _ => None,
    }
}
