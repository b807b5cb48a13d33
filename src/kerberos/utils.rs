use picky_asn1::date::GeneralizedTime;
use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::IntegerAsn1;
use picky_krb::data_types::{KerberosStringAsn1, KerberosTime, KrbResult, ResultExt};
use picky_krb::messages::KrbError;
use time::OffsetDateTime;

use crate::{Error, ErrorKind, Result};

/// [Microseconds](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.4).
///
/// ```not_rust
/// Microseconds    ::= INTEGER (0..999999)
/// ```
pub const MAX_MICROSECONDS: u32 = 999_999;

/// Big-endian two's complement bytes, sign-extended to 64 bits.
fn integer_to_i64(integer: &IntegerAsn1) -> Result<i64> {
    let bytes = integer.0.as_slice();
    let Some(&first) = bytes.first() else {
        return Err(Error::new(ErrorKind::DefectiveToken, "empty ASN.1 integer"));
    };

    let fill = if first & 0x80 != 0 { 0xff } else { 0x00 };
    let significant = bytes.iter().position(|byte| *byte != fill).unwrap_or(bytes.len());
    let bytes = &bytes[significant.saturating_sub(1).min(bytes.len() - 1)..];
    if bytes.len() > 8 {
        return Err(Error::new(ErrorKind::DefectiveToken, "ASN.1 integer does not fit in 64 bits"));
    }

    let mut value = [fill; 8];
    value[8 - bytes.len()..].copy_from_slice(bytes);

    Ok(i64::from_be_bytes(value))
}

/// Reads a 32-bit Kerberos value such as a sequence number or a nonce. Some
/// implementations encode those as negative `Int32`, so both signs are accepted.
pub(crate) fn integer_to_u32(integer: &IntegerAsn1) -> Result<u32> {
    let value = integer_to_i64(integer)?;

    if let Ok(value) = u32::try_from(value) {
        return Ok(value);
    }

    i32::try_from(value)
        .map(|value| value as u32)
        .map_err(|_| Error::new(ErrorKind::DefectiveToken, format!("{} is not a 32-bit value", value)))
}

pub(crate) fn integer_to_i32(integer: &IntegerAsn1) -> Result<i32> {
    let value = integer_to_i64(integer)?;

    i32::try_from(value).map_err(|_| Error::new(ErrorKind::DefectiveToken, format!("{} is not an Int32", value)))
}

pub(crate) fn u32_to_integer(value: u32) -> IntegerAsn1 {
    IntegerAsn1::from_bytes_be_unsigned(value.to_be_bytes().to_vec())
}

pub(crate) fn kerberos_string(value: &str) -> Result<KerberosStringAsn1> {
    Ok(KerberosStringAsn1::from(IA5String::from_string(value.to_owned())?))
}

/// Current time and its microseconds, as carried by authenticators and timestamps.
pub(crate) fn kerberos_now() -> (KerberosTime, IntegerAsn1) {
    let now = OffsetDateTime::now_utc();
    let microseconds = now.microsecond().min(MAX_MICROSECONDS);

    (
        KerberosTime::from(GeneralizedTime::from(now)),
        IntegerAsn1::from(microseconds.to_be_bytes().to_vec()),
    )
}

/// Decodes a KDC reply that is either `T` or a KRB-ERROR.
pub(crate) fn decode_kdc_reply<'de, T>(reply: &'de [u8]) -> Result<std::result::Result<T, KrbError>>
where
    T: serde::Deserialize<'de>,
{
    if reply.is_empty() {
        return Err(Error::new(ErrorKind::DefectiveToken, "empty KDC reply"));
    }

    let mut deserializer = picky_asn1_der::Deserializer::new_from_bytes(reply);
    let reply = KrbResult::<T>::deserialize(&mut deserializer)?;

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_accept_both_encodings() {
        // positive with the sign padding byte
        let unsigned = IntegerAsn1::from(vec![0x00, 0xde, 0xad, 0xbe, 0xef]);
        // the same value written as a negative Int32
        let negative = IntegerAsn1::from(vec![0xde, 0xad, 0xbe, 0xef]);

        assert_eq!(integer_to_u32(&unsigned).unwrap(), 0xdead_beef);
        assert_eq!(integer_to_u32(&negative).unwrap(), 0xdead_beef);
        assert_eq!(integer_to_u32(&IntegerAsn1::from(vec![0x05])).unwrap(), 5);
        assert_eq!(integer_to_u32(&u32_to_integer(0x8000_0001)).unwrap(), 0x8000_0001);
    }

    #[test]
    fn negative_etypes_are_kept() {
        assert_eq!(integer_to_i32(&IntegerAsn1::from(vec![0x80])).unwrap(), -128);
        assert_eq!(integer_to_i32(&IntegerAsn1::from(vec![0x12])).unwrap(), 18);
    }

    #[test]
    fn oversized_integers_are_defective() {
        let err = integer_to_u32(&IntegerAsn1::from(vec![0x01, 0, 0, 0, 0])).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::DefectiveToken);
        assert!(integer_to_u32(&IntegerAsn1::from(Vec::new())).is_err());
    }
}
