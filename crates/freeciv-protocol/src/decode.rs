//! The delta / array-diff decoder (and its encode counterpart).
//!
//! Decode order for a delta packet is fixed: bitvector, then key fields,
//! then non-key fields in schema order, resolving each non-key field
//! against the cached baseline per its bit.

use freeciv_wire::wire::{
    self, bit_is_set, bitvector_byte_count, decode_bitvector, decode_bool8, decode_s16, decode_s32,
    decode_s8, decode_string, decode_u16, decode_u32, decode_u8, encode_bitvector, encode_bool8,
    encode_s16, encode_s32, encode_s8, encode_string, encode_u16, encode_u32, encode_u8, set_bit,
};

use crate::cache::DeltaCache;
use crate::error::ProtocolError;
use crate::schema::{FieldSchema, PacketSchema};
use crate::value::{DecodedRecord, FieldKind, FieldValue, KeyTuple};

/// Decode one scalar field (never an array) at `offset`.
fn decode_scalar(kind: FieldKind, buf: &[u8], offset: usize) -> Result<(FieldValue, usize), ProtocolError> {
    Ok(match kind {
        FieldKind::U8 => {
            let (v, n) = decode_u8(buf, offset)?;
            (FieldValue::U8(v), n)
        }
        FieldKind::U16 => {
            let (v, n) = decode_u16(buf, offset)?;
            (FieldValue::U16(v), n)
        }
        FieldKind::U32 => {
            let (v, n) = decode_u32(buf, offset)?;
            (FieldValue::U32(v), n)
        }
        FieldKind::S8 => {
            let (v, n) = decode_s8(buf, offset)?;
            (FieldValue::S8(v), n)
        }
        FieldKind::S16 => {
            let (v, n) = decode_s16(buf, offset)?;
            (FieldValue::S16(v), n)
        }
        FieldKind::S32 => {
            let (v, n) = decode_s32(buf, offset)?;
            (FieldValue::S32(v), n)
        }
        FieldKind::Bool => {
            let (v, n) = decode_bool8(buf, offset)?;
            (FieldValue::Bool(v), n)
        }
        FieldKind::String => {
            let (v, n) = decode_string(buf, offset)?;
            (FieldValue::String(v), n)
        }
        FieldKind::Array => unreachable!("decode_scalar never called for array fields"),
    })
}

fn encode_scalar(value: &FieldValue, out: &mut Vec<u8>) {
    match value {
        FieldValue::U8(v) => encode_u8(out, *v),
        FieldValue::U16(v) => encode_u16(out, *v),
        FieldValue::U32(v) => encode_u32(out, *v),
        FieldValue::S8(v) => encode_s8(out, *v),
        FieldValue::S16(v) => encode_s16(out, *v),
        FieldValue::S32(v) => encode_s32(out, *v),
        FieldValue::Bool(v) => encode_bool8(out, *v),
        FieldValue::String(v) => encode_string(out, v),
        FieldValue::Array(_) => unreachable!("encode_scalar never called for array fields"),
    }
}

fn decode_array_dense(
    element_kind: FieldKind,
    capacity: u16,
    buf: &[u8],
    mut offset: usize,
) -> Result<(FieldValue, usize), ProtocolError> {
    let mut items = Vec::with_capacity(capacity as usize);
    for _ in 0..capacity {
        let (v, next) = decode_scalar(element_kind, buf, offset)?;
        items.push(v);
        offset = next;
    }
    Ok((FieldValue::Array(items), offset))
}

fn encode_array_dense(items: &[FieldValue], out: &mut Vec<u8>) {
    for item in items {
        encode_scalar(item, out);
    }
}

fn read_index(buf: &[u8], offset: usize, wide: bool) -> Result<(u32, usize), ProtocolError> {
    if wide {
        let (v, next) = decode_u16(buf, offset)?;
        Ok((v as u32, next))
    } else {
        let (v, next) = decode_u8(buf, offset)?;
        Ok((v as u32, next))
    }
}

fn write_index(out: &mut Vec<u8>, index: u32, wide: bool) {
    if wide {
        encode_u16(out, index as u16);
    } else {
        encode_u8(out, index as u8);
    }
}

/// `index₀ value₀ index₁ value₁ … sentinel` where `sentinel == capacity`.
fn decode_array_diff(
    element_kind: FieldKind,
    capacity: u16,
    baseline: &[FieldValue],
    buf: &[u8],
    mut offset: usize,
) -> Result<(FieldValue, usize), ProtocolError> {
    let wide = capacity > 255;
    let mut items = baseline.to_vec();
    loop {
        let (index, next) = read_index(buf, offset, wide)?;
        offset = next;
        if index == capacity as u32 {
            break;
        }
        if index > capacity as u32 {
            return Err(ProtocolError::ArrayIndexOutOfRange { index, capacity });
        }
        let (value, next) = decode_scalar(element_kind, buf, offset)?;
        offset = next;
        items[index as usize] = value;
    }
    Ok((FieldValue::Array(items), offset))
}

fn encode_array_diff(items: &[FieldValue], baseline: &[FieldValue], capacity: u16, out: &mut Vec<u8>) {
    let wide = capacity > 255;
    for (i, (item, base)) in items.iter().zip(baseline.iter()).enumerate() {
        if item != base {
            write_index(out, i as u32, wide);
            encode_scalar(item, out);
        }
    }
    write_index(out, capacity as u32, wide);
}

fn decode_field(field: &FieldSchema, buf: &[u8], offset: usize) -> Result<(FieldValue, usize), ProtocolError> {
    match field.kind {
        FieldKind::Array => {
            let element_kind = field.element_kind.expect("array field carries element_kind");
            let capacity = field.capacity.expect("array field carries capacity");
            decode_array_dense(element_kind, capacity, buf, offset)
        }
        scalar => decode_scalar(scalar, buf, offset),
    }
}

fn encode_field(field: &FieldSchema, value: &FieldValue, out: &mut Vec<u8>) {
    match (&field.kind, value) {
        (FieldKind::Array, FieldValue::Array(items)) => encode_array_dense(items, out),
        _ => encode_scalar(value, out),
    }
}

/// Decode a non-delta packet body. Arrays are always dense here.
pub fn decode_nondelta(schema: &PacketSchema, body: &[u8]) -> Result<DecodedRecord, ProtocolError> {
    let mut record = DecodedRecord::new();
    let mut offset = 0;
    for field in &schema.fields {
        let (value, next) = decode_field(field, body, offset)?;
        record.push(field.name, value);
        offset = next;
    }
    Ok(record)
}

pub fn encode_nondelta(schema: &PacketSchema, record: &DecodedRecord) -> Vec<u8> {
    let mut out = Vec::new();
    for field in &schema.fields {
        let value = record.get(field.name).expect("record missing declared field");
        encode_field(field, value, &mut out);
    }
    out
}

fn default_baseline(schema: &PacketSchema) -> DecodedRecord {
    let mut record = DecodedRecord::new();
    for field in schema.non_key_fields() {
        let value = match field.kind {
            FieldKind::Array => {
                let element_kind = field.element_kind.expect("array carries element_kind");
                let capacity = field.capacity.expect("array carries capacity") as usize;
                FieldValue::Array(vec![FieldValue::default_for(element_kind); capacity])
            }
            scalar => FieldValue::default_for(scalar),
        };
        record.push(field.name, value);
    }
    record
}

/// Decode a delta packet body, consulting and updating `cache`.
pub fn decode_delta(
    schema: &PacketSchema,
    body: &[u8],
    cache: &DeltaCache,
) -> Result<DecodedRecord, ProtocolError> {
    let bit_count = schema.bitvector_bit_count();
    let byte_count = bitvector_byte_count(bit_count);

    let (bitvector, mut offset) = decode_bitvector(body, 0, byte_count)?;

    let mut key_values = Vec::new();
    for field in schema.key_fields() {
        let (value, next) = decode_field(field, body, offset)?;
        offset = next;
        key_values.push(value);
    }
    let key_tuple = KeyTuple::from_values(&key_values);

    let baseline = match cache.get(schema.packet_type, &key_tuple) {
        Some(cached) => cached,
        None => {
            tracing::debug!(packet_type = schema.packet_type, "no cached baseline, using field defaults");
            default_baseline(schema)
        }
    };

    let mut non_key_record = DecodedRecord::new();
    for (i, field) in schema.non_key_fields().enumerate() {
        let bit = bit_is_set(&bitvector, i);
        let baseline_value = baseline.get(field.name).expect("baseline carries every non-key field").clone();

        let value = match (&field.kind, field.use_diff, bit) {
            (FieldKind::Bool, _, _) => FieldValue::Bool(bit),
            (FieldKind::Array, true, true) => {
                let element_kind = field.element_kind.expect("array carries element_kind");
                let capacity = field.capacity.expect("array carries capacity");
                let FieldValue::Array(base_items) = &baseline_value else {
                    unreachable!("array field baseline is always FieldValue::Array")
                };
                let (value, next) = decode_array_diff(element_kind, capacity, base_items, body, offset)?;
                offset = next;
                value
            }
            (FieldKind::Array, true, false) => baseline_value,
            (_, _, true) => {
                let (value, next) = decode_field(field, body, offset)?;
                offset = next;
                value
            }
            (_, _, false) => baseline_value,
        };
        non_key_record.push(field.name, value);
    }

    cache.put(schema.packet_type, key_tuple, non_key_record.clone());

    let mut full_record = DecodedRecord::new();
    for (name, value) in key_values_named(schema, &key_values) {
        full_record.push(name, value);
    }
    for (name, value) in non_key_record.iter() {
        full_record.push(name, value.clone());
    }
    Ok(full_record)
}

fn key_values_named<'a>(schema: &'a PacketSchema, key_values: &[FieldValue]) -> Vec<(&'a str, FieldValue)> {
    schema
        .key_fields()
        .zip(key_values.iter().cloned())
        .map(|(field, value)| (field.name, value))
        .collect()
}

/// Encode a delta packet against `cache`'s current baseline. When there is
/// no cached baseline (first delta for this key), every non-key bit is set
/// since there is nothing to omit.
pub fn encode_delta(schema: &PacketSchema, record: &DecodedRecord, cache: &DeltaCache) -> Vec<u8> {
    let key_values: Vec<FieldValue> = schema
        .key_fields()
        .map(|f| record.get(f.name).expect("record missing key field").clone())
        .collect();
    let key_tuple = KeyTuple::from_values(&key_values);
    let baseline = cache.get(schema.packet_type, &key_tuple).unwrap_or_else(|| default_baseline(schema));

    let bit_count = schema.bitvector_bit_count();
    let mut bitvector = vec![0u8; bitvector_byte_count(bit_count)];
    let mut payload = Vec::new();

    for (i, field) in schema.non_key_fields().enumerate() {
        let value = record.get(field.name).expect("record missing non-key field");
        let baseline_value = baseline.get(field.name).expect("baseline carries every non-key field");
        let changed = value != baseline_value;

        match field.kind {
            FieldKind::Bool => {
                if let FieldValue::Bool(b) = value {
                    if *b {
                        set_bit(&mut bitvector, i);
                    }
                }
            }
            FieldKind::Array if field.use_diff => {
                if changed {
                    set_bit(&mut bitvector, i);
                    let capacity = field.capacity.expect("array carries capacity");
                    let (FieldValue::Array(items), FieldValue::Array(base_items)) = (value, baseline_value) else {
                        unreachable!("array field values are always FieldValue::Array")
                    };
                    encode_array_diff(items, base_items, capacity, &mut payload);
                }
            }
            _ => {
                if changed {
                    set_bit(&mut bitvector, i);
                    encode_field(field, value, &mut payload);
                }
            }
        }
    }

    let mut out = Vec::new();
    encode_bitvector(&mut out, &bitvector);
    for field in schema.key_fields() {
        let value = record.get(field.name).expect("record missing key field");
        encode_field(field, value, &mut out);
    }
    out.extend_from_slice(&payload);
    cache.put(schema.packet_type, key_tuple, non_key_snapshot(schema, record));
    out
}

fn non_key_snapshot(schema: &PacketSchema, record: &DecodedRecord) -> DecodedRecord {
    let mut snapshot = DecodedRecord::new();
    for field in schema.non_key_fields() {
        snapshot.push(field.name, record.get(field.name).expect("record missing non-key field").clone());
    }
    snapshot
}

/// Dispatches to `decode_delta` or `decode_nondelta` per the schema's flag.
pub fn decode(schema: &PacketSchema, body: &[u8], cache: &DeltaCache) -> Result<DecodedRecord, ProtocolError> {
    if schema.has_delta {
        decode_delta(schema, body, cache)
    } else {
        decode_nondelta(schema, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{registry, PACKET_CHAT_MSG, PACKET_GAME_INFO};

    fn chat_schema() -> &'static PacketSchema {
        registry().lookup(PACKET_CHAT_MSG).unwrap()
    }

    fn game_info_schema() -> &'static PacketSchema {
        registry().lookup(PACKET_GAME_INFO).unwrap()
    }

    #[test]
    fn scenario_1_chat_message_first_delta() {
        let schema = chat_schema();
        let cache = DeltaCache::new();
        let body: &[u8] = &[
            0x3F, b'H', b'i', 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07,
        ];
        let record = decode_delta(schema, body, &cache).unwrap();
        assert_eq!(record.get("message"), Some(&FieldValue::String("Hi".to_string())));
        assert_eq!(record.get("tile"), Some(&FieldValue::S32(-1)));
        assert_eq!(record.get("event"), Some(&FieldValue::S16(5)));
        assert_eq!(record.get("turn"), Some(&FieldValue::S16(1)));
        assert_eq!(record.get("phase"), Some(&FieldValue::S16(0)));
        assert_eq!(record.get("conn_id"), Some(&FieldValue::S16(7)));
    }

    #[test]
    fn scenario_2_chat_message_reuses_cache() {
        let schema = chat_schema();
        let cache = DeltaCache::new();
        let first: &[u8] = &[
            0x3F, b'H', b'i', 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07,
        ];
        decode_delta(schema, first, &cache).unwrap();

        let second: &[u8] = &[0x01, b'B', b'y', b'e', 0x00];
        let record = decode_delta(schema, second, &cache).unwrap();
        assert_eq!(record.get("message"), Some(&FieldValue::String("Bye".to_string())));
        assert_eq!(record.get("tile"), Some(&FieldValue::S32(-1)));
        assert_eq!(record.get("event"), Some(&FieldValue::S16(5)));
        assert_eq!(record.get("turn"), Some(&FieldValue::S16(1)));
        assert_eq!(record.get("phase"), Some(&FieldValue::S16(0)));
        assert_eq!(record.get("conn_id"), Some(&FieldValue::S16(7)));
    }

    #[test]
    fn scenario_3_boolean_header_folding() {
        let schema = PacketSchema {
            packet_type: 9001,
            has_delta: true,
            fields: vec![
                FieldSchema::scalar("id", FieldKind::U32, true),
                FieldSchema::scalar("active", FieldKind::Bool, false),
                FieldSchema::scalar("visible", FieldKind::Bool, false),
                FieldSchema::scalar("count", FieldKind::S16, false),
            ],
        };
        let cache = DeltaCache::new();
        let body: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x05, 0x00, 0x0A];
        let record = decode_delta(&schema, body, &cache).unwrap();
        assert_eq!(record.get("id"), Some(&FieldValue::U32(1)));
        assert_eq!(record.get("active"), Some(&FieldValue::Bool(true)));
        assert_eq!(record.get("visible"), Some(&FieldValue::Bool(false)));
        assert_eq!(record.get("count"), Some(&FieldValue::S16(10)));
    }

    #[test]
    fn scenario_4_array_diff_narrow_indices() {
        let capacity = 10u16;
        let baseline = vec![FieldValue::Bool(false); capacity as usize];
        let body: &[u8] = &[0x02, 0x01, 0x05, 0x01, 0x0A];
        let (value, consumed) = decode_array_diff(FieldKind::Bool, capacity, &baseline, body, 0).unwrap();
        assert_eq!(consumed, body.len());
        let FieldValue::Array(items) = value else { panic!("expected array") };
        for (i, item) in items.iter().enumerate() {
            let expected = i == 2 || i == 5;
            assert_eq!(item, &FieldValue::Bool(expected), "index {i}");
        }
    }

    #[test]
    fn scenario_5_array_diff_wide_indices() {
        let capacity = 401u16;
        let baseline = vec![FieldValue::Bool(false); capacity as usize];
        let body: &[u8] = &[0x00, 0x05, 0x01, 0x00, 0x0A, 0x01, 0x01, 0x91];
        let (value, consumed) = decode_array_diff(FieldKind::Bool, capacity, &baseline, body, 0).unwrap();
        assert_eq!(consumed, body.len());
        let FieldValue::Array(items) = value else { panic!("expected array") };
        assert_eq!(items[5], FieldValue::Bool(true));
        assert_eq!(items[10], FieldValue::Bool(true));
        assert_eq!(items[0], FieldValue::Bool(false));
    }

    #[test]
    fn array_index_past_capacity_is_rejected() {
        let capacity = 10u16;
        let baseline = vec![FieldValue::Bool(false); capacity as usize];
        let body: &[u8] = &[0x0B];
        let err = decode_array_diff(FieldKind::Bool, capacity, &baseline, body, 0).unwrap_err();
        assert_eq!(err, ProtocolError::ArrayIndexOutOfRange { index: 11, capacity: 10 });
    }

    #[test]
    fn round_trip_nondelta_join_reply() {
        let schema = PacketSchema {
            packet_type: 5,
            has_delta: false,
            fields: vec![
                FieldSchema::scalar("you_can_join", FieldKind::Bool, false),
                FieldSchema::scalar("message", FieldKind::String, false),
            ],
        };
        let mut record = DecodedRecord::new();
        record.push("you_can_join", FieldValue::Bool(true));
        record.push("message", FieldValue::String("welcome".to_string()));
        let bytes = encode_nondelta(&schema, &record);
        let decoded = decode_nondelta(&schema, &bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn encode_then_decode_delta_round_trips_through_cache() {
        let schema = chat_schema();
        let cache = DeltaCache::new();
        let mut record = DecodedRecord::new();
        record.push("message", FieldValue::String("Hi".to_string()));
        record.push("tile", FieldValue::S32(-1));
        record.push("event", FieldValue::S16(5));
        record.push("turn", FieldValue::S16(1));
        record.push("phase", FieldValue::S16(0));
        record.push("conn_id", FieldValue::S16(7));

        let encode_cache = DeltaCache::new();
        let wire = encode_delta(schema, &record, &encode_cache);
        let decoded = decode_delta(schema, &wire, &cache).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn game_info_delta_exercises_mixed_scalar_and_array_diff_bits() {
        let schema = game_info_schema();
        let cache = DeltaCache::new();
        // bitvector 0x03: bit 0 (turn, plain scalar) and bit 1 (id_of_max_city_size,
        // array-diff) both set, in the same byte.
        let body: &[u8] = &[
            0x03, // bitvector
            0x00, 0x07, // turn = 7
            0x02, 0x01, 0x05, 0x01, 0x0A, // array-diff: index 2 -> true, index 5 -> true, sentinel
        ];
        let record = decode_delta(schema, body, &cache).unwrap();
        assert_eq!(record.get("turn"), Some(&FieldValue::S16(7)));
        let Some(FieldValue::Array(items)) = record.get("id_of_max_city_size") else {
            panic!("expected array field")
        };
        for (i, item) in items.iter().enumerate() {
            let expected = i == 2 || i == 5;
            assert_eq!(item, &FieldValue::Bool(expected), "index {i}");
        }

        // A later delta that only touches the array bit must reuse the
        // cached turn value instead of resetting it to default, and the
        // array diff must merge onto the previously cached array rather
        // than resetting untouched indices.
        let second: &[u8] = &[0x02, 0x02, 0x00, 0x0A];
        let record2 = decode_delta(schema, second, &cache).unwrap();
        assert_eq!(record2.get("turn"), Some(&FieldValue::S16(7)));
        let Some(FieldValue::Array(items2)) = record2.get("id_of_max_city_size") else {
            panic!("expected array field")
        };
        assert_eq!(items2[2], FieldValue::Bool(false), "index 2 flipped back by this delta");
        assert_eq!(items2[5], FieldValue::Bool(true), "index 5 persists from the cached baseline");
    }

    #[test]
    fn game_info_encode_then_decode_delta_round_trips_through_cache() {
        let schema = game_info_schema();
        let mut items = vec![FieldValue::Bool(false); 10];
        items[2] = FieldValue::Bool(true);
        items[5] = FieldValue::Bool(true);
        let mut record = DecodedRecord::new();
        record.push("turn", FieldValue::S16(7));
        record.push("id_of_max_city_size", FieldValue::Array(items));

        let encode_cache = DeltaCache::new();
        let wire = encode_delta(schema, &record, &encode_cache);
        let decode_cache = DeltaCache::new();
        let decoded = decode_delta(schema, &wire, &decode_cache).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn short_body_surfaces_wire_error() {
        let schema = chat_schema();
        let cache = DeltaCache::new();
        let err = decode_delta(schema, &[0x3F], &cache).unwrap_err();
        assert!(matches!(err, ProtocolError::Wire(wire::WireError::ShortRead { .. })));
    }
}
