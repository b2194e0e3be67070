//! Encodes/decodes columnar entity-state tables: the canonical
//! `<ns>/data.parquet` snapshot and the `events/pending/<id>.parquet`
//! row-groups emitted by bulk writes. Both share the shape "one row per
//! entity carrying its post-image (or `None` for a tombstone) as of some
//! sequence number".

use arrow::array::{Array, ArrayRef, StringArray, UInt64Array};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use parquedb_core::{EntityId, Error, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

/// One row: an entity's id, the sequence of its last applied mutation, and
/// its post-image (`None` for a tombstone row produced by a hard delete).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    /// The entity this row describes.
    pub id: EntityId,
    /// The sequence number of the mutation that produced this state.
    pub seq: u64,
    /// The full post-image, or `None` if this row records a deletion.
    pub state_json: Option<String>,
}

fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("seq", DataType::UInt64, false),
        Field::new("state_json", DataType::Utf8, true),
    ]))
}

/// Serialize entity rows into a Parquet byte buffer.
pub fn encode(rows: &[EntityRow]) -> Result<Vec<u8>> {
    let ids: StringArray = rows.iter().map(|r| Some(r.id.to_string())).collect();
    let seqs: UInt64Array = rows.iter().map(|r| Some(r.seq)).collect();
    let states: StringArray = rows.iter().map(|r| r.state_json.clone()).collect();

    let schema = schema();
    let columns: Vec<ArrayRef> = vec![Arc::new(ids), Arc::new(seqs), Arc::new(states)];
    let batch = RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| Error::backend_with_source("build entity batch record batch", e))?;

    let mut buf = Vec::new();
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))
        .map_err(|e| Error::backend_with_source("open parquet writer", e))?;
    writer.write(&batch).map_err(|e| Error::backend_with_source("write entity batch", e))?;
    writer.close().map_err(|e| Error::backend_with_source("close parquet writer", e))?;
    Ok(buf)
}

/// Deserialize a Parquet byte buffer produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Vec<EntityRow>> {
    let bytes = bytes::Bytes::copy_from_slice(bytes);
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| Error::backend_with_source("open parquet reader", e))?;
    let reader = builder.build().map_err(|e| Error::backend_with_source("build parquet reader", e))?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| Error::backend_with_source("read entity batch", e))?;
        let ids = batch
            .column_by_name("id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::backend("missing/malformed column \"id\""))?;
        let seqs = batch
            .column_by_name("seq")
            .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
            .ok_or_else(|| Error::backend("missing/malformed column \"seq\""))?;
        let states = batch
            .column_by_name("state_json")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::backend("missing/malformed column \"state_json\""))?;

        for row in 0..batch.num_rows() {
            let id = EntityId::parse(ids.value(row))
                .map_err(|e| Error::backend_with_source("decode entity id", e))?;
            let state_json = if states.is_null(row) { None } else { Some(states.value(row).to_string()) };
            out.push(EntityRow { id, seq: seqs.value(row), state_json });
        }
    }
    Ok(out)
}
