//! Payload encoding.
//!
//! Values are stored as [rkyv](https://rkyv.org/) archives. Archives are validated with
//! `bytecheck` before being deserialized, so bytes written by a misbehaving participant surface
//! as [`BridgeError::DecodeError`] instead of undefined behaviour.
use bytecheck::CheckBytes;
use rkyv::ser::serializers::{AlignedSerializer, AllocSerializer};
use rkyv::ser::Serializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{check_archived_root, AlignedVec, Archive, Deserialize, Infallible, Serialize};

use crate::bridge::BridgeError;
use crate::bridge::BridgeError::*;

/// Serialize `entity` reusing `buf` as output buffer.
pub(crate) fn encode<T, const N: usize>(
    entity: &T,
    mut buf: AlignedVec,
) -> Result<AlignedVec, BridgeError>
where
    T: Serialize<AllocSerializer<N>>,
{
    buf.clear();

    let mut serializer = AllocSerializer::new(
        AlignedSerializer::new(buf),
        Default::default(),
        Default::default(),
    );
    let _ = serializer
        .serialize_value(entity)
        .map_err(|_| FailedEntityWrite)?;

    Ok(serializer.into_serializer().into_inner())
}

/// Copy payload `data` out of the region into an aligned buffer.
///
/// The payload starts at an odd offset of the mapping, archives can only be validated from
/// properly aligned memory.
pub(crate) fn aligned_copy(data: &[u8]) -> AlignedVec {
    let mut buf = AlignedVec::with_capacity(data.len());
    buf.extend_from_slice(data);
    buf
}

/// Validate and deserialize an archived `T` from `data`.
pub(crate) fn decode<T>(data: &AlignedVec) -> Result<T, BridgeError>
where
    T: Archive,
    T::Archived: for<'b> CheckBytes<DefaultValidator<'b>> + Deserialize<T, Infallible>,
{
    let archived = check_archived_root::<T>(data).map_err(|_| DecodeError)?;
    archived
        .deserialize(&mut Infallible)
        .map_err(|_| DecodeError)
}
