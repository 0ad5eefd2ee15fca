use std::fmt;

use rand::Rng as _;

use crate::constants::CLIENT_PREFIX;

/// Identifies one end of a peer wire connection in the handshake.
///
/// Local ids are `-SW0001-` followed by twelve random bytes.
///
/// ```
/// use swarmwire::PeerId;
///
/// let local = PeerId::generate();
/// assert_eq!(&local.as_bytes()[..8], b"-SW0001-");
/// assert_ne!(local, PeerId::generate());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        let (prefix, random) = id.split_at_mut(CLIENT_PREFIX.len());
        prefix.copy_from_slice(CLIENT_PREFIX);
        rand::rng().fill(random);
        Self(id)
    }

    /// `None` unless `bytes` is exactly 20 long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    /// Shows the printable client tag a remote id usually opens with, and
    /// hex for anything else.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = &self.0[..CLIENT_PREFIX.len()];
        if tag.iter().all(u8::is_ascii_graphic) {
            return write!(f, "PeerId({})", String::from_utf8_lossy(tag));
        }
        f.write_str("PeerId(")?;
        for byte in tag {
            write!(f, "{:02x}", byte)?;
        }
        f.write_str(")")
    }
}
