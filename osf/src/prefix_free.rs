//! Filter over key sets in which no key is a prefix of another.
//!
//! Every stored key ends at a leaf and every internal node has both
//! children, so a single bit per node (leaf or not) decides membership.
//! A two-bit root mask records which first-bit subtrees exist.

use std::io;

use bfuse::Dictionary;
use binout::{AsIs, Serializer};
use dyn_size_of::GetSize;

use crate::bits::key_bit;
use crate::conf::FilterConf;
use crate::engine::{construct, Cursor, Engine};
use crate::keyset::KeySetInfo;
use crate::BuildError;

pub struct PrefixFreeFilter {
    core: Engine,
    /// One bit per node: cleared iff the node is a leaf.
    leaves: Dictionary,
    root_mask: u8,
}

impl PrefixFreeFilter {
    pub(crate) fn new(keys: &[&[u8]], info: &KeySetInfo, conf: &FilterConf) -> Result<Self, BuildError> {
        let root_mask = (1 << key_bit(keys[0], 0) as u8) | (1 << key_bit(keys[keys.len() - 1], 0) as u8);
        let (core, leaves) = construct(
            keys,
            info,
            conf,
            |data| Dictionary::new(data.masks.len(), 1),
            |leaves, data| {
                leaves.try_build(
                    data.masks.len(),
                    |i| data.hashes[i],
                    |i, out| out[0] = (data.masks[i] != 0) as u8,
                )
            },
        )?;
        Ok(Self { core, leaves, root_mask })
    }

    #[inline]
    pub(crate) fn core(&self) -> &Engine {
        &self.core
    }

    #[inline]
    fn is_leaf(&self, hash: u64) -> bool {
        self.leaves.get_u64(hash) == 0
    }

    pub(crate) fn point_in(&self, key: &[u8], buffer: &mut [u8]) -> bool {
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
            if self.is_leaf(cur.hash) {
                return false;
            }
            if !cur.take_link(bit, buffer) {
                return false;
            }
            pos += 1;
        }
        if cur.in_link() {
            return false;
        }
        self.is_leaf(cur.hash)
    }

    pub(crate) fn prefix_in(&self, key: &[u8], buffer: &mut [u8]) -> bool {
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
            if self.is_leaf(cur.hash) {
                return false;
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
            return self.tail(right, 0, Cursor::new(&self.core), include_right, false, true, tail_buf);
        }
        let total = left.len() * 8;
        let mut cur = Cursor::new(&self.core);
        let mut pos = 0;
        // the endpoints agree at most along the left one
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
            if self.is_leaf(cur.hash) {
                return false;
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
        // the left endpoint is a proper prefix of the right one
        if !cur.in_link() {
            return self.tail(right, pos, cur, include_right, false, true, tail_buf);
        }
        self.right_link(right, pos, cur, prefix_buf, tail_buf, include_right)
    }

    /// Is there a key of this subtree inside the queried interval, on the
    /// side of `key`? `can_pick` is false while still on the endpoints'
    /// common prefix, where the sibling subtrees lie outside the interval.
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
        let total = key.len() * 8;
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
            if self.is_leaf(cur.hash) {
                // the leaf key precedes the endpoint, which suits only the right side
                return can_pick && !is_left;
            }
            if bit != is_left && can_pick {
                return true;
            }
            if !cur.take_link(bit, buffer) {
                return false;
            }
            pos += 1;
            can_pick = true;
        }
        if cur.in_link() {
            // the remaining link leads to keys extending the endpoint
            return is_left;
        }
        if self.is_leaf(cur.hash) { include } else { is_left }
    }

    fn left_link(
        &self,
        left: &[u8],
        mut pos: usize,
        mut cur: Cursor,
        prefix_buf: &[u8],
        tail_buf: &mut [u8],
        include: bool,
    ) -> bool {
        let total = left.len() * 8;
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
        if pos == total {
            if !cur.in_link() {
                // at a node: either keys extend the endpoint, or it is the leaf itself
                return !self.is_leaf(cur.hash) || include;
            }
            return true;
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
        let total = right.len() * 8;
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
        if pos == total {
            if !cur.in_link() && include {
                return self.is_leaf(cur.hash);
            }
            return false;
        }
        self.tail(right, pos, cur, include, false, true, tail_buf)
    }

    pub(crate) fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        self.core.write(output)?;
        AsIs::write(output, self.root_mask)?;
        self.leaves.write(output)
    }

    pub(crate) fn write_bytes(&self) -> usize {
        self.core.write_bytes() + 1 + self.leaves.write_bytes()
    }

    pub(crate) fn read(input: &mut dyn io::Read, hash_cache_size: usize) -> io::Result<Self> {
        let core = Engine::read(input, hash_cache_size)?;
        let root_mask = AsIs::read(input)?;
        let leaves = Dictionary::read(input)?;
        Ok(Self { core, leaves, root_mask })
    }
}

impl GetSize for PrefixFreeFilter {
    #[inline]
    fn size_bytes_dyn(&self) -> usize {
        self.core.size_bytes_dyn() + self.leaves.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}
