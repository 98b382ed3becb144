//! Legacy asset wire format
//!
//! Fixed-offset layout used by the proprietary asset protocol:
//! ```text
//! +----------+------+-------+------+---------+-----+------+-----+------+---------+------+
//! | ID (hex) | Type | Local | Temp | Created | NL  | Name | DL  | Desc | DataLen | Data |
//! | 32B      | 1B   | 1B    | 1B   | 4B BE   | 1B  | NL B | 1B  | DL B | 4B BE   | var  |
//! +----------+------+-------+------+---------+-----+------+-----+------+---------+------+
//! ```
//!
//! Everything up to `Created` is mandatory. Older servers wrote truncated
//! records, so the variable tail is decoded leniently: a missing name or
//! description decodes as empty, missing data as empty, and the data length
//! is clamped to what is left in the buffer.

use assetvault_common::{Asset, AssetId, AssetType, Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{TimeZone, Utc};

/// Bytes of the mandatory header
pub const HEADER_SIZE: usize = 39;

/// Longest encodable name or description, in UTF-8 bytes
pub const MAX_TEXT_LEN: usize = u8::MAX as usize;

const ID_HEX_LEN: usize = 32;

/// Encode an asset into the wire layout
pub fn encode(asset: &Asset) -> Result<Bytes> {
    let name = asset.name.as_bytes();
    let description = asset.description.as_bytes();
    check_text("name", name)?;
    check_text("description", description)?;

    let created = u32::try_from(asset.create_time.timestamp()).map_err(|_| {
        Error::invalid_argument(format!(
            "creation time {} does not fit the wire format",
            asset.create_time
        ))
    })?;
    let data_len = u32::try_from(asset.data.len())
        .map_err(|_| Error::invalid_argument("asset data exceeds 4 GiB"))?;

    let mut buf = BytesMut::with_capacity(
        HEADER_SIZE + 2 + name.len() + description.len() + 4 + asset.data.len(),
    );
    buf.put_slice(asset.id.to_simple_hex().as_bytes());
    buf.put_i8(asset.asset_type.value());
    buf.put_u8(u8::from(asset.local));
    buf.put_u8(u8::from(asset.temporary));
    buf.put_u32(created);
    buf.put_u8(name.len() as u8);
    buf.put_slice(name);
    buf.put_u8(description.len() as u8);
    buf.put_slice(description);
    buf.put_u32(data_len);
    buf.put_slice(&asset.data);

    Ok(buf.freeze())
}

fn check_text(field: &str, bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_TEXT_LEN {
        return Err(Error::invalid_argument(format!(
            "{field} is {} bytes, the wire format allows {MAX_TEXT_LEN}",
            bytes.len()
        )));
    }
    Ok(())
}

/// Decode an asset from the wire layout
pub fn decode(data: &[u8]) -> Result<Asset> {
    if data.len() < HEADER_SIZE {
        return Err(Error::invalid_format(format!(
            "wire record is {} bytes, header needs {HEADER_SIZE}",
            data.len()
        )));
    }

    let mut buf = data;

    let id_hex = std::str::from_utf8(&buf[..ID_HEX_LEN])
        .map_err(|_| Error::invalid_format("wire record id is not ASCII"))?;
    let id = AssetId::from_simple_hex(id_hex)
        .map_err(|e| Error::invalid_format(format!("wire record id: {e}")))?;
    buf.advance(ID_HEX_LEN);

    let asset_type = AssetType::new(buf.get_i8());
    let local = buf.get_u8() != 0;
    let temporary = buf.get_u8() != 0;
    let created = buf.get_u32();
    let create_time = Utc
        .timestamp_opt(i64::from(created), 0)
        .single()
        .ok_or_else(|| Error::invalid_format("wire record creation time out of range"))?;

    let name = read_text(&mut buf);
    let description = name.as_ref().and_then(|_| read_text(&mut buf));
    let payload = description.as_ref().and_then(|_| read_data(&mut buf));

    Ok(Asset {
        id,
        asset_type,
        local,
        temporary,
        create_time,
        name: name.unwrap_or_default(),
        description: description.unwrap_or_default(),
        data: payload.unwrap_or_default(),
        storage_flags: 0,
    })
}

/// Length-prefixed text; `None` once the buffer runs out
fn read_text(buf: &mut &[u8]) -> Option<String> {
    if !buf.has_remaining() {
        return None;
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        buf.advance(buf.remaining());
        return None;
    }
    let text = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    Some(text)
}

/// Length-prefixed payload, clamped to the bytes left
fn read_data(buf: &mut &[u8]) -> Option<Bytes> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = (buf.get_u32() as usize).min(buf.remaining());
    let data = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Some(data)
}
