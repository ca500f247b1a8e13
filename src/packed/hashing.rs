use super::{to_writer, types::Hash, Error, Writer};

use serde::Serialize;
use sha3::{
    digest::{core_api::CoreWrapper, Output},
    Digest, Keccak256, Keccak256Core,
};

pub struct Keccak256Writer {
    hasher: CoreWrapper<Keccak256Core>,
}

impl Default for Keccak256Writer {
    fn default() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }
}

impl Writer for Keccak256Writer {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

impl Keccak256Writer {
    pub fn finalize(self) -> Output<Keccak256> {
        self.hasher.finalize()
    }
}

/// Hash the packed encoding of `value` without materializing the bytes.
pub fn to_hash<T>(value: &T) -> Result<Hash, Error>
where
    T: Serialize + ?Sized,
{
    let mut writer = Keccak256Writer::default();
    to_writer(value, &mut writer)?;
    Ok(Hash(writer.finalize().into()))
}

/// Keccak256 over the concatenation of `parts`.
///
/// Infallible shortcut for places that hash raw fixed-width values (merkle
/// nodes, secrets) and thus don't need to go through the serializer.
pub fn keccak256(parts: &[&[u8]]) -> Hash {
    let mut writer = Keccak256Writer::default();
    for part in parts {
        writer.write(part);
    }
    Hash(writer.finalize().into())
}
