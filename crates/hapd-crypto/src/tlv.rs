//! TLV8 encoding/decoding for pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are carried by consecutive items with the
//! same type, every item but the last exactly 255 bytes long.
//!
//! A [`Tlv8`] keeps the items as a chain in wire order. Readers reassemble
//! fragmented values transparently; [`Tlv8::insert`] prepends, so a message
//! built by inserting `A`, then `B`, then `C` exports as `C B A`.

use hapd_core::error::ParseError;

/// Largest value a single item can carry.
pub const MAX_ITEM_LEN: usize = 255;

/// TLV type constants for pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    Separator = 0xFF,
}

/// One-byte error codes carried in a [`TlvType::Error`] item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvError {
    Unknown = 0x01,
    Authentication = 0x02,
    Backoff = 0x03,
    MaxPeers = 0x04,
    MaxTries = 0x05,
    Unavailable = 0x06,
    Busy = 0x07,
}

/// A single tag/length/value triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvItem {
    tag: u8,
    value: Vec<u8>,
    consumed: usize,
}

/// Position of an item inside a [`Tlv8`] chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvRef(usize);

/// Ordered chain of TLV items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<TlvItem>,
}

impl TlvItem {
    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    fn is_full(&self) -> bool {
        self.value.len() == MAX_ITEM_LEN
    }
}

impl Tlv8 {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TLV8 from bytes.
    ///
    /// Items are kept as they appear on the wire; fragments are joined by
    /// the readers, not here.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut items = Vec::new();
        let mut i = 0;

        while i < data.len() {
            if i + 2 > data.len() {
                return Err(ParseError::InvalidFormat(
                    "TLV8: truncated header".to_string(),
                ));
            }

            let tag = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                return Err(ParseError::InvalidFormat(format!(
                    "TLV8: truncated value (expected {} bytes, got {})",
                    len,
                    data.len() - i
                )));
            }

            items.push(TlvItem {
                tag,
                value: data[i..i + len].to_vec(),
                consumed: 0,
            });
            i += len;
        }

        Ok(Self { items })
    }

    /// Prepend an attribute to `chain`, creating the chain when absent.
    ///
    /// Data longer than 255 bytes becomes several same-tag items in order.
    pub fn insert(chain: Option<Tlv8>, tag: TlvType, data: &[u8]) -> Tlv8 {
        let mut chain = chain.unwrap_or_default();
        chain.push_front(tag as u8, data);
        chain
    }

    /// Prepend an attribute with a raw tag.
    pub fn push_front(&mut self, tag: u8, data: &[u8]) {
        let fragments: Vec<TlvItem> = if data.is_empty() {
            vec![TlvItem {
                tag,
                value: Vec::new(),
                consumed: 0,
            }]
        } else {
            data.chunks(MAX_ITEM_LEN)
                .map(|chunk| TlvItem {
                    tag,
                    value: chunk.to_vec(),
                    consumed: 0,
                })
                .collect()
        };
        self.items.splice(0..0, fragments);
    }

    /// Serialize in chain order, consuming the chain.
    pub fn export(self) -> Vec<u8> {
        let size = self.items.iter().map(|item| 2 + item.value.len()).sum();
        let mut out = Vec::with_capacity(size);
        for item in self.items {
            out.push(item.tag);
            out.push(item.value.len() as u8);
            out.extend_from_slice(&item.value);
        }
        out
    }

    /// First item with `tag`, searching from the head.
    pub fn find(&self, tag: TlvType) -> Option<TlvRef> {
        self.find_raw(tag as u8)
    }

    pub fn find_raw(&self, tag: u8) -> Option<TlvRef> {
        self.items.iter().position(|item| item.tag == tag).map(TlvRef)
    }

    /// Total length of the attribute starting at `at`, across fragments.
    pub fn value_length(&self, at: TlvRef) -> usize {
        self.fragments(at).map(|item| item.value.len()).sum()
    }

    /// Copy up to `buf.len()` unread bytes of the attribute at `at`.
    ///
    /// Reading continues into the next item only while the current one is a
    /// full 255-byte fragment followed by an item with the same tag.
    pub fn read(&mut self, at: TlvRef, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        let mut idx = at.0;

        while copied < buf.len() && idx < self.items.len() {
            let item = &mut self.items[idx];
            let remaining = &item.value[item.consumed..];
            let n = remaining.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&remaining[..n]);
            item.consumed += n;
            copied += n;

            if item.consumed < item.value.len() || !item.is_full() {
                break;
            }
            let tag = item.tag;
            match self.items.get(idx + 1) {
                Some(next) if next.tag == tag => idx += 1,
                _ => break,
            }
        }

        copied
    }

    /// Reassembled value of the first attribute with `tag`.
    ///
    /// Unlike [`Tlv8::read`] this ignores and leaves untouched the unread
    /// offsets.
    pub fn get(&self, tag: TlvType) -> Option<Vec<u8>> {
        let at = self.find(tag)?;
        let mut value = Vec::with_capacity(self.value_length(at));
        for item in self.fragments(at) {
            value.extend_from_slice(&item.value);
        }
        Some(value)
    }

    /// Reassembled value that must be exactly `N` bytes long.
    pub fn get_array<const N: usize>(&self, tag: TlvType) -> Option<[u8; N]> {
        self.get(tag)?.try_into().ok()
    }

    pub fn contains(&self, tag: TlvType) -> bool {
        self.find(tag).is_some()
    }

    /// Get state value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.first_byte(TlvType::State)
    }

    /// Get error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.first_byte(TlvType::Error)
    }

    pub fn items(&self) -> &[TlvItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn first_byte(&self, tag: TlvType) -> Option<u8> {
        let at = self.find(tag)?;
        self.items[at.0].value.first().copied()
    }

    fn fragments(&self, at: TlvRef) -> impl Iterator<Item = &TlvItem> + '_ {
        let tag = self.items.get(at.0).map(|item| item.tag);
        let mut more = tag.is_some();
        self.items[at.0.min(self.items.len())..]
            .iter()
            .take_while(move |item| {
                if !more || Some(item.tag) != tag {
                    return false;
                }
                more = item.is_full();
                true
            })
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }
}

impl TlvError {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Unknown),
            0x02 => Some(Self::Authentication),
            0x03 => Some(Self::Backoff),
            0x04 => Some(Self::MaxPeers),
            0x05 => Some(Self::MaxTries),
            0x06 => Some(Self::Unavailable),
            0x07 => Some(Self::Busy),
            _ => None,
        }
    }
}
