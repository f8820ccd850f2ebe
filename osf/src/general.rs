//! Filter over arbitrary key sets, where a key may be a proper prefix of
//! another. Each node stores a two-bit mask of its outgoing links; nodes
//! with both children additionally store whether a key terminates there.
//! A node with fewer than two children always marks a key's end, so the
//! endpoint bit is only needed at full branches.

use std::io;

use bfuse::Dictionary;
use dyn_size_of::GetSize;

use crate::bits::key_bit;
use crate::conf::FilterConf;
use crate::engine::{construct, Cursor, Engine};
use crate::keyset::KeySetInfo;
use crate::BuildError;

pub struct GeneralFilter {
    core: Engine,
    /// Two bits per node: bit `b` set iff child `b` exists.
    masks: Dictionary,
    /// One bit per two-child node: does a key end here?
    endpoints: Dictionary,
}

impl GeneralFilter {
    pub(crate) fn new(keys: &[&[u8]], info: &KeySetInfo, conf: &FilterConf) -> Result<Self, BuildError> {
        let (core, (masks, endpoints)) = construct(
            keys,
            info,
            conf,
            |data| {
                (
                    Dictionary::new(data.masks.len(), 2),
                    Dictionary::new(data.endpoints.len(), 1),
                )
            },
            |(masks, endpoints), data| {
                let mut built = masks.try_build(
                    data.masks.len(),
                    |i| data.hashes[i],
                    |i, out| out[0] = data.masks[i],
                );
                built &= endpoints.try_build(
                    data.endpoints.len(),
                    |i| data.hashes[data.endpoints[i].0 as usize],
                    |i, out| out[0] = data.endpoints[i].1 as u8,
                );
                built
            },
        )?;
        Ok(Self { core, masks, endpoints })
    }

    #[inline]
    pub(crate) fn core(&self) -> &Engine {
        &self.core
    }

    #[inline]
    fn mask(&self, hash: u64) -> u8 {
        self.masks.get_u64(hash) as u8
    }

    #[inline]
    fn is_endpoint(&self, hash: u64) -> bool {
        self.endpoints.get_u64(hash) & 1 != 0
    }

    pub(crate) fn point_in(&self, key: &[u8], buffer: &mut [u8]) -> bool {
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
            if self.mask(cur.hash) & (1 << bit as u8) == 0 {
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
        // a node with fewer than two children marks a key's end by construction
        let mask = self.mask(cur.hash);
        if mask != 3 {
            return true;
        }
        self.is_endpoint(cur.hash)
    }

    pub(crate) fn prefix_in(&self, key: &[u8], buffer: &mut [u8]) -> bool {
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
            if self.mask(cur.hash) & (1 << bit as u8) == 0 {
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
            let mask = self.mask(cur.hash);
            if lbit != rbit {
                if mask & 1 != 0
                    && self.tail(left, pos, cur, include_left, true, false, tail_buf)
                {
                    return true;
                }
                if mask & 2 != 0
                    && self.tail(right, pos, cur, include_right, false, false, tail_buf)
                {
                    return true;
                }
                return false;
            }
            if mask & (1 << lbit as u8) == 0 {
                return false;
            }
            if !cur.take_link(lbit, prefix_buf) {
                return false;
            }
            pos += 1;
        }

        // the left endpoint is a proper prefix of the right one
        if include_left {
            let mask = self.mask(cur.hash);
            if mask != 3 {
                return true;
            }
            if self.is_endpoint(cur.hash) {
                return true;
            }
        }
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
            let mask = self.mask(cur.hash);
            if can_pick {
                if !is_left {
                    // every prefix of the right endpoint that ends a key is in range
                    if mask != 3 {
                        return true;
                    }
                    if self.is_endpoint(cur.hash) {
                        return true;
                    }
                }
                if is_left != bit && mask & (1 << (1 - bit as u8)) != 0 {
                    return true;
                }
            }
            if mask & (1 << bit as u8) == 0 {
                return false;
            }
            if !cur.take_link(bit, buffer) {
                return false;
            }
            can_pick = true;
            pos += 1;
        }
        if cur.in_link() {
            // the remaining link leads to keys extending the endpoint
            return is_left;
        }
        let mask = self.mask(cur.hash);
        if is_left {
            if mask != 0 {
                return true;
            }
            include && can_pick
        } else {
            if !can_pick {
                return false;
            }
            if mask != 3 {
                return include;
            }
            self.is_endpoint(cur.hash)
        }
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
            // everything below extends the endpoint
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
                let mask = self.mask(cur.hash);
                if mask != 3 {
                    return true;
                }
                return self.is_endpoint(cur.hash);
            }
            return false;
        }
        self.tail(right, pos, cur, include, false, true, tail_buf)
    }

    pub(crate) fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        self.core.write(output)?;
        self.masks.write(output)?;
        self.endpoints.write(output)
    }

    pub(crate) fn write_bytes(&self) -> usize {
        self.core.write_bytes() + self.masks.write_bytes() + self.endpoints.write_bytes()
    }

    pub(crate) fn read(input: &mut dyn io::Read, hash_cache_size: usize) -> io::Result<Self> {
        let core = Engine::read(input, hash_cache_size)?;
        let masks = Dictionary::read(input)?;
        let endpoints = Dictionary::read(input)?;
        Ok(Self { core, masks, endpoints })
    }
}

impl GetSize for GeneralFilter {
    #[inline]
    fn size_bytes_dyn(&self) -> usize {
        self.core.size_bytes_dyn() + self.masks.size_bytes_dyn() + self.endpoints.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}
