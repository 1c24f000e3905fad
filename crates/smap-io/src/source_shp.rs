use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use shapefile::dbase::FieldValue;
use shapefile::{Point, Shape};
use smap_core::{parse_options, ConfigError, Decoder, MapError, Record, RecordIter, SourceFormat, Value};
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// The `shp` format takes no options; an empty object is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShpOptions {}

pub struct ShpFormat;

impl SourceFormat for ShpFormat {
    fn name(&self) -> &str {
        "shp"
    }

    fn configure(&self, options: &Value) -> Result<Box<dyn Decoder>, ConfigError> {
        let _: ShpOptions = parse_options(self.name(), options)?;
        Ok(Box::new(ShpDecoder))
    }
}

/// Reads shapes and their dBASE attributes as GeoJSON-like features.
///
/// The shapefile reader only hands out borrowing iterators, so it runs on a
/// helper thread feeding a rendezvous channel: the thread blocks until the
/// consumer pulls, keeping a single record in flight. Open failures arrive
/// as the first item.
#[derive(Debug, Clone, Copy)]
pub struct ShpDecoder;

impl Decoder for ShpDecoder {
    fn open(&self, path: &Path) -> Result<RecordIter, MapError> {
        let (tx, rx) = sync_channel(0);
        let file = path.to_path_buf();
        let worker = thread::Builder::new()
            .name("smap-shp".into())
            .spawn(move || {
                let mut reader = match shapefile::Reader::from_path(&file) {
                    Ok(reader) => reader,
                    Err(e) => {
                        let e = anyhow::Error::new(e).context(format!("open {}", file.display()));
                        send(&tx, Err(MapError::source_io(&file, e)));
                        return;
                    }
                };
                for item in reader.iter_shapes_and_records() {
                    let failed = item.is_err();
                    let result = item
                        .map(|(shape, record)| feature(&shape, record))
                        .map_err(|e| MapError::source_io(&file, e));
                    if !send(&tx, result) || failed {
                        break;
                    }
                }
                debug!(path = %file.display(), "shapefile reader stopped");
            })
            .with_context(|| format!("spawn reader for {}", path.display()))
            .map_err(|e| MapError::source_io(path, e))?;

        Ok(Box::new(ShpRecords {
            rx: Some(rx),
            worker: Some(worker),
        }))
    }
}

/// Receiving end of the reader thread. Dropping it disconnects the channel
/// and waits for the thread, so the file is closed once the drop returns.
struct ShpRecords {
    rx: Option<Receiver<Result<Record, MapError>>>,
    worker: Option<JoinHandle<()>>,
}

impl Iterator for ShpRecords {
    type Item = Result<Record, MapError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for ShpRecords {
    fn drop(&mut self) {
        // disconnect first so a blocked send returns
        self.rx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// `false` once the consumer has gone away.
fn send(tx: &SyncSender<Result<Record, MapError>>, item: Result<Record, MapError>) -> bool {
    tx.send(item).is_ok()
}

/// Properties are sorted by name: dBASE records come back as an unordered
/// map, so the column order of the file is not available.
fn feature(shape: &Shape, record: shapefile::dbase::Record) -> Record {
    let mut fields: Vec<(String, FieldValue)> = record.into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    let properties: Record = fields
        .into_iter()
        .map(|(name, value)| (name, field_value(value)))
        .collect();

    let mut feature = Record::new();
    feature.insert("type".into(), json!("Feature"));
    feature.insert("properties".into(), Value::Object(properties));
    feature.insert("geometry".into(), geometry(shape));
    feature
}

fn iso_date(date: &shapefile::dbase::Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

fn field_value(value: FieldValue) -> Value {
    match value {
        FieldValue::Character(text) => text.map_or(Value::Null, Value::String),
        FieldValue::Numeric(number) => number.map_or(Value::Null, Value::from),
        FieldValue::Logical(flag) => flag.map_or(Value::Null, Value::Bool),
        FieldValue::Float(number) => number.map_or(Value::Null, |n| Value::from(f64::from(n))),
        FieldValue::Integer(number) => Value::from(number),
        FieldValue::Double(number) => Value::from(number),
        FieldValue::Currency(number) => Value::from(number),
        FieldValue::Memo(text) => Value::String(text),
        FieldValue::Date(None) => Value::Null,
        FieldValue::Date(Some(date)) => Value::String(iso_date(&date)),
        FieldValue::DateTime(stamp) => {
            let time = stamp.time();
            Value::String(format!(
                "{}T{:02}:{:02}:{:02}Z",
                iso_date(&stamp.date()),
                time.hours(),
                time.minutes(),
                time.seconds()
            ))
        }
        other => Value::String(format!("{other:?}")),
    }
}

fn xy(point: &Point) -> Value {
    json!([point.x, point.y])
}

fn geometry(shape: &Shape) -> Value {
    match shape {
        Shape::NullShape => Value::Null,
        Shape::Point(point) => json!({ "type": "Point", "coordinates": xy(point) }),
        Shape::Multipoint(points) => json!({
            "type": "MultiPoint",
            "coordinates": points.points().iter().map(xy).collect::<Vec<_>>(),
        }),
        Shape::Polyline(line) => json!({
            "type": "MultiLineString",
            "coordinates": line
                .parts()
                .iter()
                .map(|part| part.iter().map(xy).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
        }),
        Shape::Polygon(polygon) => json!({
            "type": "Polygon",
            "coordinates": polygon
                .rings()
                .iter()
                .map(|ring| ring.points().iter().map(xy).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
        }),
        other => json!({ "type": format!("{:?}", other.shapetype()) }),
    }
}
