//! Fixed-width hex key for a cell identifier.
//!
//! Layout: 3 hex digits of `mcc`, 4 of `mnc`, 8 of `lac`, 8 of `cid`, lowercase,
//! 23 characters total.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CellfetchError, Result};
use crate::types::CellIdentifier;

pub const KEY_LEN: usize = 23;

const MCC_MAX: u32 = 0xFFF;
const MNC_MAX: u32 = 0xFFFF;

#[allow(clippy::non_std_lazy_statics)]
static KEY_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^([0-9a-f]{3})([0-9a-f]{4})([0-9a-f]{8})([0-9a-f]{8})$").ok());

/// Encode a complete identifier. Fails only when a field is absent or wider
/// than its slot.
pub fn encode(id: &CellIdentifier) -> Result<String> {
    let (Some(mcc), Some(mnc), Some(lac), Some(cid)) = (id.mcc, id.mnc, id.lac, id.cid) else {
        return Err(CellfetchError::InvalidKey {
            key: id.to_string(),
            reason: "identifier has absent fields".into(),
        });
    };
    if mcc > MCC_MAX || mnc > MNC_MAX {
        return Err(CellfetchError::InvalidKey {
            key: id.to_string(),
            reason: format!("mcc must be <= {MCC_MAX:#x} and mnc <= {MNC_MAX:#x}"),
        });
    }
    Ok(format!("{mcc:03x}{mnc:04x}{lac:08x}{cid:08x}"))
}

/// Decode a key produced by [`encode`].
pub fn decode(key: &str) -> Result<CellIdentifier> {
    let invalid = |reason: &str| CellfetchError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let pattern = KEY_PATTERN
        .as_ref()
        .ok_or_else(|| invalid("key pattern failed to compile"))?;
    let caps = pattern
        .captures(key)
        .ok_or_else(|| invalid("expected 23 lowercase hex digits"))?;

    let mut fields = [0u32; 4];
    for (slot, field) in fields.iter_mut().enumerate() {
        let digits = caps
            .get(slot + 1)
            .map(|m| m.as_str())
            .ok_or_else(|| invalid("missing key segment"))?;
        *field = u32::from_str_radix(digits, 16).map_err(|_| invalid("bad hex segment"))?;
    }
    let [mcc, mnc, lac, cid] = fields;
    Ok(CellIdentifier::new(mcc, mnc, lac, cid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_known_identifier() {
        let key = encode(&CellIdentifier::new(460, 0, 2, 5465)).expect("encode");
        assert_eq!(key, "1cc00000000000200001559");
        assert_eq!(key.len(), KEY_LEN);
    }

    #[test]
    fn decode_inverts_encode_for_random_identifiers() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..500 {
            let id = CellIdentifier::new(
                rng.u32(..=MCC_MAX),
                rng.u32(..=MNC_MAX),
                rng.u32(..),
                rng.u32(..),
            );
            let key = encode(&id).expect("encode");
            assert_eq!(decode(&key).expect("decode"), id, "key {key}");
        }
    }

    #[test]
    fn extreme_values_fill_every_slot() {
        let id = CellIdentifier::new(MCC_MAX, MNC_MAX, u32::MAX, u32::MAX);
        assert_eq!(encode(&id).expect("encode"), "fffffffffffffffffffffff");
    }

    #[test]
    fn rejects_malformed_keys() {
        for bad in [
            "",
            "1cc0000000000020000155",
            "1cc000000000002000015590",
            "1CC00000000000200001559",
            "1cc0000000000020000155g",
            " 1cc00000000000200001559",
        ] {
            assert!(
                matches!(decode(bad), Err(CellfetchError::InvalidKey { .. })),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn encode_rejects_out_of_range_and_incomplete() {
        assert!(encode(&CellIdentifier::new(0x1000, 0, 0, 0)).is_err());
        assert!(encode(&CellIdentifier::new(0, 0x1_0000, 0, 0)).is_err());
        assert!(encode(&CellIdentifier::from_row("460,0")).is_err());
    }
}
