// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-key helpers shared by the cursor and the range model.

/// A raw key. Keys are ordered lexicographically by bytes.
pub type Key = Vec<u8>;

/// A raw value. An empty value means "no value exists".
pub type Value = Vec<u8>;

/// Returns the smallest key strictly greater than `key`.
///
/// Appending a `0x00` byte produces the immediate successor in byte order:
/// no key can sort between `key` and `key + [0]`.
pub fn next_key(key: &[u8]) -> Key {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

/// Returns `true` if `end_key` denotes an unbounded end, i.e. the last range.
pub fn is_unbounded(end_key: &[u8]) -> bool {
    end_key.is_empty()
}

/// Renders a key for logging, escaping non printable bytes.
pub(crate) fn display_key(key: &[u8]) -> String {
    key.escape_ascii().to_string()
}
