use byteorder::{LittleEndian, ReadBytesExt};
use time::OffsetDateTime;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_DELTA_SECS: i128 = 11_644_473_600;

pub fn string_to_utf16(value: &str) -> Vec<u8> {
    value
        .encode_utf16()
        .flat_map(|i| i.to_le_bytes().to_vec())
        .collect::<Vec<u8>>()
}

/// Decodes UTF-16LE bytes, replacing invalid sequences. A trailing odd byte is ignored.
pub fn bytes_to_utf16_string(mut value: &[u8]) -> String {
    let mut value_u16 = vec![0x00; value.len() / 2];
    if value.read_u16_into::<LittleEndian>(value_u16.as_mut()).is_err() {
        return String::new();
    }

    String::from_utf16_lossy(value_u16.as_ref())
}

/// Returns a copy of `data` rotated left by `n` bytes.
///
/// Byte `i` of the result is byte `(i + n) % len` of the input. Rotation amounts larger
/// than the buffer wrap around; an empty buffer is returned unchanged.
pub fn rotate_left(data: &[u8], n: usize) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }

    let n = n % data.len();
    let mut rotated = Vec::with_capacity(data.len());
    rotated.extend_from_slice(&data[n..]);
    rotated.extend_from_slice(&data[..n]);

    rotated
}

/// Returns a copy of `data` rotated right by `n` bytes. Inverse of [`rotate_left`].
pub fn rotate_right(data: &[u8], n: usize) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }

    let n = n % data.len();

    rotate_left(data, data.len() - n)
}

/// Current time as a Windows FILETIME (100ns ticks since 1601).
pub fn current_filetime() -> u64 {
    filetime_from(OffsetDateTime::now_utc())
}

pub fn filetime_from(time: OffsetDateTime) -> u64 {
    let ticks = (time.unix_timestamp_nanos() / 100) + FILETIME_EPOCH_DELTA_SECS * 10_000_000;

    u64::try_from(ticks).unwrap_or_default()
}

/// Splits `service/host[@REALM]` into its service and host parts.
pub fn split_service_principal(spn: &str) -> Option<(&str, &str)> {
    let spn = spn.split('@').next().unwrap_or(spn);
    let (service, host) = spn.split_once('/')?;
    if service.is_empty() || host.is_empty() {
        return None;
    }

    Some((service, host.split('/').next().unwrap_or(host)))
}

/// Returns the realm suffix of `user@REALM` style names.
pub fn get_domain_from_fqdn(fqdn: &str) -> Option<&str> {
    fqdn.rsplit_once('@').map(|(_, domain)| domain).filter(|domain| !domain.is_empty())
}
