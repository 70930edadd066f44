//! Lua scripts backing the multi-structure stream operations.
//!
//! Stream entries always carry their payload under one field, passed in as an
//! argument, so the same scripts work for every payload type.

use redis::Script;
use std::sync::LazyLock;

/// KEYS: stream. ARGV: group, ids...
pub static ACK_DELETE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local stream_key = KEYS[1]
local group = ARGV[1]
for i = 2, #ARGV do
  redis.call("XACK", stream_key, group, ARGV[i])
  redis.call("XDEL", stream_key, ARGV[i])
end
return #ARGV - 1
"#,
    )
});

/// KEYS: latest height, pending set, stream. ARGV: data field, height.
///
/// Records the height, then moves every pending job scored below it onto the
/// stream, smallest score first. Returns the number of jobs moved.
pub static FLUSH: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local latest_height_key = KEYS[1]
local pending_set_key = KEYS[2]
local stream_key = KEYS[3]
local data_field = ARGV[1]
local height = tonumber(ARGV[2])

redis.call("SET", latest_height_key, height)

local max_elem = redis.call("ZRANGE", pending_set_key, -1, -1, "WITHSCORES")
if #max_elem == 0 then
  return 0
end

local moved = 0
if tonumber(max_elem[2]) < height then
  while true do
    local elem = redis.call("ZPOPMIN", pending_set_key)
    if #elem ~= 2 then
      return moved
    end
    redis.call("XADD", stream_key, "*", data_field, elem[1])
    moved = moved + 1
  end
end

while true do
  local elem = redis.call("ZRANGE", pending_set_key, 0, 0, "WITHSCORES")
  if #elem == 0 or tonumber(elem[2]) >= height then
    return moved
  end
  redis.call("ZPOPMIN", pending_set_key)
  redis.call("XADD", stream_key, "*", data_field, elem[1])
  moved = moved + 1
end
"#,
    )
});

/// KEYS: latest height, pending set, stream. ARGV: group, data field, old id,
/// new height, new payload.
///
/// Returns 1 when the job was parked in the pending set, 0 when it went back
/// onto the stream.
pub static ACK_AND_RESCHEDULE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local latest_height_key = KEYS[1]
local pending_set_key = KEYS[2]
local stream_key = KEYS[3]
local group = ARGV[1]
local data_field = ARGV[2]
local old_id = ARGV[3]
local new_height = tonumber(ARGV[4])
local payload = ARGV[5]

redis.call("XACK", stream_key, group, old_id)
redis.call("XDEL", stream_key, old_id)

local latest_height = redis.call("GET", latest_height_key)
if latest_height == false or new_height >= tonumber(latest_height) then
  redis.call("ZADD", pending_set_key, new_height, payload)
  return 1
end

redis.call("XADD", stream_key, "*", data_field, payload)
return 0
"#,
    )
});

/// KEYS: stream, pending set. ARGV: group, old id, payload.
pub static ACK_AND_SEED: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local stream_key = KEYS[1]
local pending_set_key = KEYS[2]
local group = ARGV[1]
local old_id = ARGV[2]
local payload = ARGV[3]

redis.call("XACK", stream_key, group, old_id)
redis.call("XDEL", stream_key, old_id)
redis.call("ZADD", pending_set_key, 0, payload)
return 1
"#,
    )
});

/// KEYS: block set. ARGV: height, payload pairs.
///
/// Adds each block unless its height is already stored. Returns the number
/// added.
pub static PUT_BLOCKS: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local block_set_key = KEYS[1]
local added = 0
for i = 1, #ARGV, 2 do
  local height = ARGV[i]
  if redis.call("ZCOUNT", block_set_key, height, height) == 0 then
    redis.call("ZADD", block_set_key, height, ARGV[i + 1])
    added = added + 1
  end
end
return added
"#,
    )
});
