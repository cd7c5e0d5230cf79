//! Keyspace serialization to the minimal reconstructing command stream.
//!
//! Both the log rewrite and the snapshot file use the same format: for each
//! database a `SELECT`, then for every live key the shortest command
//! sequence that rebuilds it, then a `PEXPIREAT` when a deadline is set.
//! Keys already expired at capture time are skipped. Aggregate values are
//! emitted in batches so replay never sees unbounded argument counts.

use crate::object::{ListVal, Object, SetVal, StrVal, Value};
use ember_core::resp::encode_request;
use ember_core::util::format_f64;
use ember_core::Bytes;
use ember_storage::Dict;
use std::io::{self, Write};
use std::sync::Arc;

/// Items per emitted RPUSH/SADD/ZADD/HMSET during serialization.
pub const BATCH_ITEMS: usize = 64;

/// A captured view of one database: cloned handle tables plus the capture
/// clock. Cloning shares the value objects; live-side mutation copies on
/// write, so the view stays frozen.
pub struct DbView {
    /// Database number.
    pub index: usize,
    /// key -> value handles at capture time.
    pub keys: Dict<Arc<Object>>,
    /// key -> deadline at capture time.
    pub expires: Dict<u64>,
}

/// Serialize `view` as a command stream. `captured_ms` filters keys whose
/// deadline already passed at capture.
pub fn serialize_keyspace(
    view: &[DbView],
    captured_ms: u64,
    out: &mut dyn Write,
) -> io::Result<()> {
    let mut scratch = Vec::new();
    for db in view {
        if db.keys.is_empty() {
            continue;
        }
        emit(
            out,
            &mut scratch,
            &[b"SELECT".to_vec(), db.index.to_string().into_bytes()],
        )?;
        for (key, obj) in db.keys.iter() {
            let deadline = db.expires.get(key).copied();
            if let Some(deadline) = deadline {
                if deadline <= captured_ms {
                    continue;
                }
            }
            serialize_value(out, &mut scratch, key, obj)?;
            if let Some(deadline) = deadline {
                emit(
                    out,
                    &mut scratch,
                    &[
                        b"PEXPIREAT".to_vec(),
                        key.clone(),
                        deadline.to_string().into_bytes(),
                    ],
                )?;
            }
        }
    }
    Ok(())
}

fn serialize_value(
    out: &mut dyn Write,
    scratch: &mut Vec<u8>,
    key: &Bytes,
    obj: &Object,
) -> io::Result<()> {
    match &obj.value {
        Value::Str(s) => {
            let payload = match s {
                StrVal::Int(n) => n.to_string().into_bytes(),
                StrVal::Raw(b) => b.clone(),
            };
            emit(out, scratch, &[b"SET".to_vec(), key.clone(), payload])
        }
        Value::List(list) => {
            let items: Vec<Bytes> = match list {
                ListVal::Packed(zl) => zl.iter().map(|v| v.to_bytes()).collect(),
                ListVal::Linked(items) => items.iter().cloned().collect(),
            };
            emit_batched(out, scratch, b"RPUSH", key, &items, 1)
        }
        Value::Set(set) => {
            let members = match set {
                SetVal::Ints(ints) => ints.iter().map(|n| n.to_string().into_bytes()).collect(),
                SetVal::Table(_) => set.members(),
            };
            emit_batched(out, scratch, b"SADD", key, &members, 1)
        }
        Value::Hash(hash) => {
            let mut flat = Vec::with_capacity(hash.len() * 2);
            for (field, value) in hash.entries() {
                flat.push(field);
                flat.push(value);
            }
            emit_batched(out, scratch, b"HMSET", key, &flat, 2)
        }
        Value::ZSet(zset) => {
            let mut flat = Vec::with_capacity(zset.len() * 2);
            for (member, score) in zset.entries() {
                flat.push(format_f64(score));
                flat.push(member);
            }
            emit_batched(out, scratch, b"ZADD", key, &flat, 2)
        }
    }
}

/// Emit `CMD key item...` in chunks of `BATCH_ITEMS` logical items, where a
/// logical item spans `stride` arguments (field/value and score/member
/// pairs use stride 2).
fn emit_batched(
    out: &mut dyn Write,
    scratch: &mut Vec<u8>,
    cmd: &[u8],
    key: &Bytes,
    args: &[Bytes],
    stride: usize,
) -> io::Result<()> {
    for chunk in args.chunks(BATCH_ITEMS * stride) {
        let mut argv = Vec::with_capacity(chunk.len() + 2);
        argv.push(cmd.to_vec());
        argv.push(key.clone());
        argv.extend(chunk.iter().cloned());
        emit(out, scratch, &argv)?;
    }
    Ok(())
}

fn emit(out: &mut dyn Write, scratch: &mut Vec<u8>, argv: &[Bytes]) -> io::Result<()> {
    scratch.clear();
    encode_request(argv, scratch);
    out.write_all(scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ZSetSkip, ZSetVal};
    use ember_core::resp::RequestParser;
    use ember_storage::{IntSet, Ziplist};

    fn view_of(entries: Vec<(&str, Object)>, expires: Vec<(&str, u64)>) -> Vec<DbView> {
        let mut keys = Dict::new();
        for (k, obj) in entries {
            keys.insert(k.as_bytes().to_vec(), Arc::new(obj));
        }
        let mut exp = Dict::new();
        for (k, deadline) in expires {
            exp.insert(k.as_bytes().to_vec(), deadline);
        }
        vec![DbView {
            index: 0,
            keys,
            expires: exp,
        }]
    }

    fn parse_all(bytes: &[u8]) -> Vec<Vec<Bytes>> {
        let mut parser = RequestParser::new(bytes);
        let mut out = Vec::new();
        while let Some(args) = parser.next_request().unwrap() {
            out.push(args);
        }
        out
    }

    #[test]
    fn test_string_and_expire() {
        let view = view_of(
            vec![("k", Object::string_from(b"15.5", 0))],
            vec![("k", 99_999)],
        );
        let mut out = Vec::new();
        serialize_keyspace(&view, 1_000, &mut out).unwrap();
        let commands = parse_all(&out);
        assert_eq!(commands[0][0], b"SELECT".to_vec());
        assert_eq!(commands[1], vec![b"SET".to_vec(), b"k".to_vec(), b"15.5".to_vec()]);
        assert_eq!(
            commands[2],
            vec![b"PEXPIREAT".to_vec(), b"k".to_vec(), b"99999".to_vec()]
        );
    }

    #[test]
    fn test_expired_at_capture_skipped() {
        let view = view_of(
            vec![("gone", Object::string_from(b"x", 0))],
            vec![("gone", 500)],
        );
        let mut out = Vec::new();
        serialize_keyspace(&view, 1_000, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_list_batching() {
        let mut zl = Ziplist::new();
        for i in 0..150 {
            zl.push_back(format!("e{i}").as_bytes());
        }
        let view = view_of(
            vec![("l", Object::new(Value::List(ListVal::Packed(zl)), 0))],
            vec![],
        );
        let mut out = Vec::new();
        serialize_keyspace(&view, 0, &mut out).unwrap();
        let commands = parse_all(&out);
        // SELECT + three RPUSH batches (64 + 64 + 22).
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[1].len(), 2 + 64);
        assert_eq!(commands[3].len(), 2 + 22);
        assert_eq!(commands[1][2], b"e0".to_vec());
    }

    #[test]
    fn test_zset_pairs_stay_joined() {
        let mut skip = ZSetSkip::default();
        let mut rng = rand::thread_rng();
        for i in 0..70 {
            skip.upsert(format!("m{i}").as_bytes(), i as f64, &mut rng);
        }
        let view = view_of(
            vec![("z", Object::new(Value::ZSet(ZSetVal::Skip(skip)), 0))],
            vec![],
        );
        let mut out = Vec::new();
        serialize_keyspace(&view, 0, &mut out).unwrap();
        let commands = parse_all(&out);
        // SELECT + two ZADD batches; each batch has an even pair count.
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[1].len(), 2 + 128);
        assert_eq!(commands[2].len(), 2 + 12);
        assert_eq!(commands[1][2], b"0".to_vec());
        assert_eq!(commands[1][3], b"m0".to_vec());
    }

    #[test]
    fn test_intset_serialized_as_sadd() {
        let mut ints = IntSet::new();
        ints.insert(3);
        ints.insert(1);
        let view = view_of(
            vec![("s", Object::new(Value::Set(SetVal::Ints(ints)), 0))],
            vec![],
        );
        let mut out = Vec::new();
        serialize_keyspace(&view, 0, &mut out).unwrap();
        let commands = parse_all(&out);
        assert_eq!(
            commands[1],
            vec![b"SADD".to_vec(), b"s".to_vec(), b"1".to_vec(), b"3".to_vec()]
        );
    }
}
