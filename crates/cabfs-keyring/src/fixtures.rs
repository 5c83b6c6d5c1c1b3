//! Synthetic container construction for tests and capture tooling
//!
//! Builds byte-exact containers the parser accepts: header, entry table,
//! master-key region, sealed KEK table, and sealed content-key records, with
//! every stored offset expressed in the relative bases the format uses.

use crate::cipher;
use crate::keyring::{
    CEK_RECORD_SIZE, ENTRY_SIZE, HEADER_SIZE, KEK_TABLE_OFFSET_FIELD, MASTER_OFFSET_FIELD,
    MASTER_SIZE,
};
use crate::source::MemoryKeySource;
use crate::KEY_SIZE;

pub struct ContainerBuilder {
    code: String,
    version: String,
    master: Vec<u8>,
    keys: Vec<[u8; KEY_SIZE]>,
}

impl ContainerBuilder {
    pub fn new(code: &str, version: &str, master: Vec<u8>) -> Self {
        Self {
            code: code.to_string(),
            version: version.to_string(),
            master,
            keys: Vec::new(),
        }
    }

    /// Append a content key; its index is the current entry count.
    pub fn add_key(&mut self, key: [u8; KEY_SIZE]) -> u32 {
        self.keys.push(key);
        self.keys.len() as u32 - 1
    }

    pub fn content_key(&self, index: usize) -> [u8; KEY_SIZE] {
        self.keys[index]
    }

    /// A replay credential matching this container.
    pub fn key_source(&self) -> MemoryKeySource {
        MemoryKeySource {
            code: self.code.clone(),
            version: self.version.clone(),
            master: self.master.clone(),
        }
    }

    /// Absolute position of the KEK-table frame in the built container.
    pub fn kek_table_pos(&self) -> usize {
        let count = self.keys.len();
        HEADER_SIZE as usize + count * ENTRY_SIZE as usize + MASTER_SIZE
    }

    // Each entry's KEK is a fixed function of its index so tests stay
    // deterministic without a randomness source.
    fn kek(&self, index: usize) -> [u8; KEY_SIZE] {
        let mut kek = [0x40u8 ^ index as u8; KEY_SIZE];
        kek[0] = index as u8;
        kek
    }

    pub fn build(&self) -> Vec<u8> {
        let count = self.keys.len() as u32;

        let table_end = HEADER_SIZE + count * ENTRY_SIZE;
        let master_pos = table_end;
        let kek_table_pos = master_pos + MASTER_SIZE as u32;
        let kek_base = kek_table_pos + cipher::HEADER_SIZE as u32;
        let cek_pos = kek_base + count * KEY_SIZE as u32;

        // cek offsets are declared relative to head_size, the header and
        // entry-table prefix.
        let head_size = table_end;

        let mut out = Vec::new();
        out.extend_from_slice(&head_size.to_be_bytes());
        push_name(&mut out, &self.code);
        push_name(&mut out, &self.version);
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&(master_pos - MASTER_OFFSET_FIELD).to_be_bytes());
        out.extend_from_slice(&(MASTER_SIZE as u32).to_be_bytes());
        out.extend_from_slice(&(kek_table_pos - KEK_TABLE_OFFSET_FIELD).to_be_bytes());
        out.extend_from_slice(&(cipher::HEADER_SIZE as u32).to_be_bytes());
        debug_assert_eq!(out.len(), HEADER_SIZE as usize);

        for i in 0..count {
            // Inverts the parser's re-basing: the slice position in the
            // decrypted table is 32 * i.
            let kek_offset = KEY_SIZE as u32 * i + kek_base - HEADER_SIZE - ENTRY_SIZE * i;
            out.extend_from_slice(&kek_offset.to_be_bytes());
            out.extend_from_slice(&(KEY_SIZE as u32).to_be_bytes());
            out.extend_from_slice(&(cek_pos + CEK_RECORD_SIZE * i - head_size).to_be_bytes());
            out.extend_from_slice(&[0u8; 4]);
            out.extend_from_slice(&CEK_RECORD_SIZE.to_be_bytes());
        }

        // The wrapped master key is opaque to the parser; replay credentials
        // ignore it entirely.
        out.extend_from_slice(&[0x11u8; MASTER_SIZE]);

        let mut keks = Vec::with_capacity(count as usize * KEY_SIZE);
        for i in 0..count as usize {
            keks.extend_from_slice(&self.kek(i));
        }
        cipher::seal(&mut out, &self.master, &keks).expect("sealing kek table");

        for (i, key) in self.keys.iter().enumerate() {
            cipher::seal(&mut out, &self.kek(i), key).expect("sealing content key record");
        }

        out
    }
}

fn push_name(out: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    assert!(bytes.len() <= 64, "name field capacity is 64 bytes");
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out.resize(out.len() + 64 - bytes.len(), 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_layout() {
        let mut b = ContainerBuilder::new("05", "1.0", vec![0xEEu8; 16]);
        b.add_key([1u8; KEY_SIZE]);
        b.add_key([2u8; KEY_SIZE]);
        let bytes = b.build();

        let count = 2u32;
        let expected = HEADER_SIZE
            + count * ENTRY_SIZE
            + MASTER_SIZE as u32
            + cipher::HEADER_SIZE as u32
            + count * KEY_SIZE as u32
            + count * CEK_RECORD_SIZE;
        assert_eq!(bytes.len() as u32, expected);

        // KEK table frame opens with the cipher magic.
        let pos = b.kek_table_pos();
        assert_eq!(&bytes[pos..pos + 2], &cipher::MAGIC);
    }
}
