//! Encodes/decodes `events/batch-<ulid>.parquet` (§6 event schema):
//! columns `id, ts, op, target, before_json, after_json, entity_ids_json,
//! actor, compressed`.

use arrow::array::{Array, ArrayRef, BooleanArray, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use parquedb_core::{Document, EntityId, Error, Event, EventId, Op, Result, Timestamp};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("ts", DataType::Int64, false),
        Field::new("op", DataType::Utf8, false),
        Field::new("target", DataType::Utf8, false),
        Field::new("before_json", DataType::Utf8, true),
        Field::new("after_json", DataType::Utf8, true),
        Field::new("entity_ids_json", DataType::Utf8, true),
        Field::new("actor", DataType::Utf8, false),
        Field::new("compressed", DataType::Boolean, false),
    ]))
}

fn op_to_str(op: Op) -> &'static str {
    match op {
        Op::Create => "CREATE",
        Op::Update => "UPDATE",
        Op::Delete => "DELETE",
        Op::BulkCreate => "BULK_CREATE",
        Op::BulkUpdate => "BULK_UPDATE",
        Op::BulkDelete => "BULK_DELETE",
    }
}

fn op_from_str(s: &str) -> Result<Op> {
    match s {
        "CREATE" => Ok(Op::Create),
        "UPDATE" => Ok(Op::Update),
        "DELETE" => Ok(Op::Delete),
        "BULK_CREATE" => Ok(Op::BulkCreate),
        "BULK_UPDATE" => Ok(Op::BulkUpdate),
        "BULK_DELETE" => Ok(Op::BulkDelete),
        other => Err(Error::backend(format!("unrecognized op column value {other:?}"))),
    }
}

/// Serialize a batch of events into a Parquet byte buffer whose first and
/// last four bytes are the `PAR1` magic (guaranteed by the Parquet
/// writer/footer format itself).
pub fn encode(events: &[Event]) -> Result<Vec<u8>> {
    let ids: StringArray = events.iter().map(|e| Some(e.id.to_string())).collect();
    let ts: Int64Array = events.iter().map(|e| Some(e.ts.as_millis())).collect();
    let ops: StringArray = events.iter().map(|e| Some(op_to_str(e.op))).collect();
    let targets: StringArray = events.iter().map(|e| Some(e.target.clone())).collect();
    let before: StringArray = events
        .iter()
        .map(|e| e.before.as_ref().map(|d| serde_json::to_string(d).unwrap_or_default()))
        .collect();
    let after: StringArray = events
        .iter()
        .map(|e| e.after.as_ref().map(|d| serde_json::to_string(d).unwrap_or_default()))
        .collect();
    let entity_ids: StringArray = events
        .iter()
        .map(|e| e.entity_ids.as_ref().map(|ids| serde_json::to_string(ids).unwrap_or_default()))
        .collect();
    let actors: StringArray = events.iter().map(|e| Some(e.actor.to_string())).collect();
    let compressed: BooleanArray = events.iter().map(|e| Some(e.compressed)).collect();

    let schema = schema();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(ids),
        Arc::new(ts),
        Arc::new(ops),
        Arc::new(targets),
        Arc::new(before),
        Arc::new(after),
        Arc::new(entity_ids),
        Arc::new(actors),
        Arc::new(compressed),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| Error::backend_with_source("build event batch record batch", e))?;

    let mut buf = Vec::new();
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))
        .map_err(|e| Error::backend_with_source("open parquet writer", e))?;
    writer.write(&batch).map_err(|e| Error::backend_with_source("write event batch", e))?;
    writer.close().map_err(|e| Error::backend_with_source("close parquet writer", e))?;
    Ok(buf)
}

/// Deserialize a Parquet byte buffer produced by [`encode`] back into
/// events, in file order.
pub fn decode(bytes: &[u8]) -> Result<Vec<Event>> {
    let bytes = bytes::Bytes::copy_from_slice(bytes);
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| Error::backend_with_source("open parquet reader", e))?;
    let reader = builder.build().map_err(|e| Error::backend_with_source("build parquet reader", e))?;

    let mut events = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| Error::backend_with_source("read event batch", e))?;
        events.extend(decode_batch(&batch)?);
    }
    Ok(events)
}

fn decode_batch(batch: &RecordBatch) -> Result<Vec<Event>> {
    let col = |name: &str| -> Result<&StringArray> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::backend(format!("missing/malformed column {name:?}")))
    };
    let ids = col("id")?;
    let ts = batch
        .column_by_name("ts")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::backend("missing/malformed column \"ts\""))?;
    let ops = col("op")?;
    let targets = col("target")?;
    let before = col("before_json")?;
    let after = col("after_json")?;
    let entity_ids = col("entity_ids_json")?;
    let actors = col("actor")?;
    let compressed = batch
        .column_by_name("compressed")
        .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
        .ok_or_else(|| Error::backend("missing/malformed column \"compressed\""))?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let seq: u64 = ids.value(row).parse().map_err(|_| Error::backend("malformed id column"))?;
        let before_doc = if before.is_null(row) {
            None
        } else {
            Some(
                serde_json::from_str::<Document>(before.value(row))
                    .map_err(|e| Error::backend_with_source("decode before_json", e))?,
            )
        };
        let after_doc = if after.is_null(row) {
            None
        } else {
            Some(
                serde_json::from_str::<Document>(after.value(row))
                    .map_err(|e| Error::backend_with_source("decode after_json", e))?,
            )
        };
        let entity_ids_vec: Option<Vec<EntityId>> = if entity_ids.is_null(row) {
            None
        } else {
            Some(
                serde_json::from_str(entity_ids.value(row))
                    .map_err(|e| Error::backend_with_source("decode entity_ids_json", e))?,
            )
        };
        out.push(Event {
            id: EventId::from_seq(seq),
            ts: Timestamp::from_millis(ts.value(row)),
            op: op_from_str(ops.value(row))?,
            target: targets.value(row).to_string(),
            before: before_doc,
            after: after_doc,
            entity_ids: entity_ids_vec,
            actor: EntityId::parse(actors.value(row))
                .map_err(|e| Error::backend_with_source("decode actor", e))?,
            compressed: compressed.value(row),
        });
    }
    Ok(out)
}
