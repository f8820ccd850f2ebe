//! Filter over key sets in which every key has the same length.
//!
//! The trie needs no per-node flags: every internal node has both children
//! and every leaf sits at the same depth, so reaching leaf depth is the
//! membership criterion. A two-bit root mask records which first-bit
//! subtrees exist.

use std::io;

use binout::{AsIs, Serializer};
use dyn_size_of::GetSize;

use crate::bits::key_bit;
use crate::conf::FilterConf;
use crate::engine::{construct, Cursor, Engine};
use crate::keyset::KeySetInfo;
use crate::BuildError;

pub struct FixedFilter {
    core: Engine,
    /// Length of every stored key in bytes.
    key_len: u32,
    root_mask: u8,
}

impl FixedFilter {
    pub(crate) fn new(keys: &[&[u8]], info: &KeySetInfo, conf: &FilterConf) -> Result<Self, BuildError> {
        let root_mask = (1 << key_bit(keys[0], 0) as u8) | (1 << key_bit(keys[keys.len() - 1], 0) as u8);
        let (core, ()) = construct(keys, info, conf, |_| (), |_, _| true)?;
        Ok(Self { core, key_len: info.max_len as u32, root_mask })
    }

    #[inline]
    pub(crate) fn core(&self) -> &Engine {
        &self.core
    }

    /// Length in bytes of the keys this filter stores.
    #[inline]
    pub fn key_len(&self) -> usize {
        self.key_len as usize
    }

    pub(crate) fn point_in(&self, key: &[u8], buffer: &mut [u8]) -> bool {
        if key.len() != self.key_len as usize {
            return false;
        }
        if (self.root_mask >> key_bit(key, 0) as u8) & 1 == 0 {
            return false;
        }
        let mut cur = Cursor::new(&self.core);
        let total = key.len() * 8;
        let mut pos = 0;
        while pos < total {
            let bit = key_bit(key, pos);
            if cur.in_link() {
                if bit != cur.peek(buffer) {
                    return false;
                }
                cur.advance();
                pos += 1;
                continue;
            }
            if !cur.take_link(bit, buffer) {
                return false;
            }
            pos += 1;
        }
        !cur.in_link()
    }

    pub(crate) fn prefix_in(&self, key: &[u8], buffer: &mut [u8]) -> bool {
        if key.len() > self.key_len as usize {
            return false;
        }
        if (self.root_mask >> key_bit(key, 0) as u8) & 1 == 0 {
            return false;
        }
        let mut cur = Cursor::new(&self.core);
        let total = key.len() * 8;
        let mut pos = 0;
        while pos < total {
            let bit = key_bit(key, pos);
            if cur.in_link() {
                if bit != cur.peek(buffer) {
                    return false;
                }
                cur.advance();
                pos += 1;
                continue;
            }
            if !cur.take_link(bit, buffer) {
                return false;
            }
            pos += 1;
        }
        true
    }

    pub(crate) fn range_in(
        &self,
        left: &[u8],
        include_left: bool,
        right: &[u8],
        include_right: bool,
        prefix_buf: &mut [u8],
        tail_buf: &mut [u8],
    ) -> bool {
        if left.is_empty() {
            // no lower bound: any key up to the right endpoint qualifies
            return self.tail(right, 0, Cursor::new(&self.core), include_right, false, true, tail_buf);
        }
        let left_bit = key_bit(left, 0);
        let right_bit = key_bit(right, 0);
        if left_bit != right_bit {
            // the whole set splits on the first bit right away
            if self.root_mask & 1 != 0
                && self.tail(left, 0, Cursor::new(&self.core), include_left, true, false, tail_buf)
            {
                return true;
            }
            if self.root_mask & 2 != 0
                && self.tail(right, 0, Cursor::new(&self.core), include_right, false, false, tail_buf)
            {
                return true;
            }
            return false;
        }
        if (self.root_mask >> left_bit as u8) & 1 == 0 {
            return false;
        }

        let key_bits = self.key_len as usize * 8;
        let total = (left.len() * 8).min(right.len() * 8).min(key_bits);
        let mut cur = Cursor::new(&self.core);
        let mut pos = 0;
        while pos < total {
            let lbit = key_bit(left, pos);
            let rbit = key_bit(right, pos);
            if cur.in_link() {
                let cbit = cur.peek(prefix_buf);
                if lbit != rbit {
                    if cbit == lbit
                        && self.left_link(left, pos, cur, prefix_buf, tail_buf, include_left)
                    {
                        return true;
                    }
                    if cbit == rbit
                        && self.right_link(right, pos, cur, prefix_buf, tail_buf, include_right)
                    {
                        return true;
                    }
                    return false;
                }
                if cbit != lbit {
                    return false;
                }
                cur.advance();
                pos += 1;
                continue;
            }
            if lbit != rbit {
                if self.tail(left, pos, cur, include_left, true, false, tail_buf) {
                    return true;
                }
                if self.tail(right, pos, cur, include_right, false, false, tail_buf) {
                    return true;
                }
                return false;
            }
            if !cur.take_link(lbit, prefix_buf) {
                return false;
            }
            pos += 1;
        }

        if pos != left.len() * 8 {
            // stored keys end above: the deepest reachable key precedes the left endpoint
            return false;
        }
        if pos == key_bits {
            // the left endpoint is the only candidate in the interval
            return include_left;
        }
        // the left endpoint is a proper prefix of the keys below
        if !cur.in_link() {
            return self.tail(right, pos, cur, include_right, false, true, tail_buf);
        }
        self.right_link(right, pos, cur, prefix_buf, tail_buf, include_right)
    }

    /// Is there a key of this subtree inside the queried interval, on the
    /// side of `key`? For the left endpoint (`is_left`) that means a key
    /// `>= key` (`> key` without `include`), symmetrically for the right.
    /// `can_pick` is false while still on the endpoints' common prefix,
    /// where the sibling subtrees lie outside the interval.
    fn tail(
        &self,
        key: &[u8],
        mut pos: usize,
        mut cur: Cursor,
        include: bool,
        is_left: bool,
        mut can_pick: bool,
        buffer: &mut [u8],
    ) -> bool {
        let total = (key.len() * 8).min(self.key_len as usize * 8);
        while pos < total {
            let bit = key_bit(key, pos);
            if cur.in_link() {
                let cbit = cur.peek(buffer);
                if is_left {
                    if !bit && cbit {
                        return true;
                    }
                    if bit && !cbit {
                        return false;
                    }
                } else {
                    if bit && !cbit {
                        return true;
                    }
                    if !bit && cbit {
                        return false;
                    }
                }
                cur.advance();
                can_pick = true;
                pos += 1;
                continue;
            }
            // every internal node has both children, so once off the common
            // prefix the sibling subtree lies entirely inside the interval
            if can_pick && is_left != bit {
                return true;
            }
            if !cur.take_link(bit, buffer) {
                return false;
            }
            pos += 1;
            can_pick = true;
        }
        if pos < key.len() * 8 {
            return !is_left;
        }
        if pos < self.key_len as usize * 8 {
            return is_left;
        }
        include
    }

    /// Continues the left endpoint alone down the partially consumed link at
    /// the point where the two endpoints diverged inside it.
    fn left_link(
        &self,
        left: &[u8],
        mut pos: usize,
        mut cur: Cursor,
        prefix_buf: &[u8],
        tail_buf: &mut [u8],
        include: bool,
    ) -> bool {
        let total = (left.len() * 8).min(self.key_len as usize * 8);
        while cur.in_link() {
            let bit = key_bit(left, pos);
            let cbit = cur.peek(prefix_buf);
            if !bit && cbit {
                return true;
            }
            if bit && !cbit {
                return false;
            }
            cur.advance();
            pos += 1;
            if pos == total {
                break;
            }
        }
        if pos == self.key_len as usize * 8 {
            return pos == left.len() * 8 && include;
        }
        self.tail(left, pos, cur, include, true, true, tail_buf)
    }

    fn right_link(
        &self,
        right: &[u8],
        mut pos: usize,
        mut cur: Cursor,
        prefix_buf: &[u8],
        tail_buf: &mut [u8],
        include: bool,
    ) -> bool {
        let total = (right.len() * 8).min(self.key_len as usize * 8);
        while cur.in_link() {
            let bit = key_bit(right, pos);
            let cbit = cur.peek(prefix_buf);
            if bit && !cbit {
                return true;
            }
            if !bit && cbit {
                return false;
            }
            cur.advance();
            pos += 1;
            if pos == total {
                break;
            }
        }
        if pos == self.key_len as usize * 8 {
            return pos == right.len() * 8 && include;
        }
        self.tail(right, pos, cur, include, false, true, tail_buf)
    }

    pub(crate) fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        self.core.write(output)?;
        AsIs::write(output, self.root_mask)?;
        AsIs::write(output, self.key_len)
    }

    pub(crate) fn write_bytes(&self) -> usize {
        self.core.write_bytes() + 1 + 4
    }

    pub(crate) fn read(input: &mut dyn io::Read, hash_cache_size: usize) -> io::Result<Self> {
        let core = Engine::read(input, hash_cache_size)?;
        let root_mask = AsIs::read(input)?;
        let key_len = AsIs::read(input)?;
        Ok(Self { core, key_len, root_mask })
    }
}

impl GetSize for FixedFilter {
    #[inline]
    fn size_bytes_dyn(&self) -> usize {
        self.core.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}
