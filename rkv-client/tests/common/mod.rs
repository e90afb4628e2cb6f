//! In-process RESP2 server for integration tests.
//!
//! Understands a small command subset backed by a shared in-memory store, plus
//! a few test hooks:
//! - `SLEEP <ms>` replies `+OK` after a delay, holding back later replies.
//! - `SPLIT` writes a nested array one byte at a time.
//! - `DROP` closes the socket without replying.
//! - `DOUBLE` answers with two replies.
//! - `GARBAGE` answers with an invalid frame.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use rkv_client::{ConnectionConfig, PoolConfig, ReplyValue};
use rkv_common::Decoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Demand AUTH with this password before anything else.
    pub password: Option<String>,
    /// Required ACL user name when set.
    pub username: Option<String>,
    /// Accept connections but never answer.
    pub silent: bool,
}

pub struct MockServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockServer {
    pub async fn start() -> Self {
        Self::with_options(MockOptions::default()).await
    }

    pub async fn with_options(options: MockOptions) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(Mutex::new(Store::default()));
        let options = Arc::new(options);

        let counter = accepted.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, store.clone(), options.clone()));
            }
        });

        MockServer {
            addr,
            accepted,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connection settings with short timeouts.
    pub fn config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new("127.0.0.1", self.port());
        config.connect_timeout = Duration::from_secs(2);
        config.command_timeout = Duration::from_secs(2);
        config
    }

    pub fn pool_config(&self, min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            connection: self.config(),
            min,
            max,
            ..PoolConfig::default()
        }
    }

    /// Number of sockets accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Address that refuses connections: a listener bound then dropped.
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

/// Polls a future exactly once, without anything to wake it.
pub fn poll_once<F: Future>(future: Pin<&mut F>) -> Poll<F::Output> {
    let waker = Waker::from(Arc::new(NoopWake));
    future.poll(&mut Context::from_waker(&waker))
}

enum Value {
    Str(Vec<u8>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    List(Vec<Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
    SortedSet(HashMap<Vec<u8>, f64>),
}

#[derive(Default)]
struct Store {
    values: HashMap<Vec<u8>, Value>,
    expires: HashMap<Vec<u8>, SystemTime>,
}

impl Store {
    fn purge(&mut self, key: &[u8]) {
        if let Some(at) = self.expires.get(key) {
            if *at <= SystemTime::now() {
                self.expires.remove(key);
                self.values.remove(key);
            }
        }
    }

    fn get(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.purge(key);
        self.values.get_mut(key)
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        self.purge(key);
        self.expires.remove(key);
        self.values.remove(key).is_some()
    }
}

enum Action {
    Reply(Vec<u8>),
    Delayed(Duration, Vec<u8>),
    Trickle(Vec<u8>),
    Drop,
}

async fn serve(mut stream: TcpStream, store: Arc<Mutex<Store>>, options: Arc<MockOptions>) {
    let mut decoder = Decoder::new();
    let mut buf = BytesMut::with_capacity(4096);
    let mut authenticated = options.password.is_none();

    loop {
        loop {
            let frame = match decoder.decode(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => return,
            };
            if options.silent {
                continue;
            }
            let args = arguments(frame);
            let action = handle(&args, &store, &options, &mut authenticated);
            let written = match action {
                Action::Reply(bytes) => stream.write_all(&bytes).await,
                Action::Delayed(delay, bytes) => {
                    tokio::time::sleep(delay).await;
                    stream.write_all(&bytes).await
                }
                Action::Trickle(bytes) => {
                    let mut result = Ok(());
                    for byte in bytes {
                        result = stream.write_all(&[byte]).await;
                        if result.is_err() {
                            break;
                        }
                        let _ = stream.flush().await;
                        tokio::time::sleep(Duration::from_millis(2)).await;
                    }
                    result
                }
                Action::Drop => return,
            };
            if written.is_err() {
                return;
            }
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn arguments(frame: ReplyValue) -> Vec<Vec<u8>> {
    frame
        .into_array()
        .unwrap_or_default()
        .into_iter()
        .map(|arg| arg.as_bytes().map(<[u8]>::to_vec).unwrap_or_default())
        .collect()
}

fn handle(
    args: &[Vec<u8>],
    store: &Mutex<Store>,
    options: &MockOptions,
    authenticated: &mut bool,
) -> Action {
    let Some(name) = args.first() else {
        return Action::Reply(error("ERR empty command"));
    };
    let name = String::from_utf8_lossy(name).to_uppercase();

    if name == "AUTH" {
        return Action::Reply(auth(&args[1..], options, authenticated));
    }
    if !*authenticated {
        return Action::Reply(error("NOAUTH Authentication required."));
    }

    match name.as_str() {
        "SLEEP" => {
            let millis = args.get(1).and_then(|ms| parse_i64(ms)).unwrap_or(0);
            return Action::Delayed(Duration::from_millis(millis as u64), simple("OK"));
        }
        "SPLIT" => {
            let mut bytes = b"*2\r\n*2\r\n:1\r\n$3\r\nfoo\r\n".to_vec();
            bytes.extend_from_slice(b"$-1\r\n");
            return Action::Trickle(bytes);
        }
        "DROP" => return Action::Drop,
        "DOUBLE" => {
            let mut bytes = simple("OK");
            bytes.extend_from_slice(&simple("EXTRA"));
            return Action::Reply(bytes);
        }
        "GARBAGE" => return Action::Reply(b"?garbage\r\n".to_vec()),
        _ => {}
    }

    let mut store = store.lock().expect("store lock");
    Action::Reply(execute(&name, &args[1..], &mut store))
}

fn auth(args: &[Vec<u8>], options: &MockOptions, authenticated: &mut bool) -> Vec<u8> {
    let Some(expected) = options.password.as_deref() else {
        return error("ERR AUTH <password> called without any password configured for the default user.");
    };
    let (user, password) = match args {
        [password] => (None, password),
        [user, password] => (Some(user.as_slice()), password),
        _ => return error("ERR wrong number of arguments for 'auth' command"),
    };
    let user_ok = match (options.username.as_deref(), user) {
        (Some(required), Some(user)) => required.as_bytes() == user,
        (Some(_), None) => false,
        (None, Some(user)) => user == b"default",
        (None, None) => true,
    };
    if user_ok && password.as_slice() == expected.as_bytes() {
        *authenticated = true;
        simple("OK")
    } else {
        error("WRONGPASS invalid username-password pair or user is disabled.")
    }
}

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

fn execute(name: &str, args: &[Vec<u8>], store: &mut Store) -> Vec<u8> {
    match (name, args) {
        ("PING", []) => simple("PONG"),
        ("PING", [message]) | ("ECHO", [message]) => bulk(message),
        ("GET", [key]) => match store.get(key) {
            None => nil(),
            Some(Value::Str(data)) => bulk(data),
            Some(_) => error(WRONGTYPE),
        },
        ("SET", [key, value, rest @ ..]) => {
            store.remove(key);
            store.values.insert(key.clone(), Value::Str(value.clone()));
            if let [flag, seconds] = rest {
                if flag.eq_ignore_ascii_case(b"EX") {
                    let Some(seconds) = parse_i64(seconds).filter(|s| *s > 0) else {
                        return error("ERR invalid expire time in 'set' command");
                    };
                    store.expires.insert(
                        key.clone(),
                        SystemTime::now() + Duration::from_secs(seconds as u64),
                    );
                }
            }
            simple("OK")
        }
        ("MGET", keys) if !keys.is_empty() => {
            let items = keys
                .iter()
                .map(|key| match store.get(key) {
                    Some(Value::Str(data)) => bulk(data),
                    _ => nil(),
                })
                .collect();
            array(items)
        }
        ("MSET", pairs) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            for pair in pairs.chunks(2) {
                store.remove(&pair[0]);
                store.values.insert(pair[0].clone(), Value::Str(pair[1].clone()));
            }
            simple("OK")
        }
        ("DEL", keys) if !keys.is_empty() => {
            integer(keys.iter().filter(|key| store.remove(key)).count() as i64)
        }
        ("EXISTS", keys) if !keys.is_empty() => {
            integer(keys.iter().filter(|key| store.get(key).is_some()).count() as i64)
        }
        ("INCR", [key]) => incr_by(store, key, 1),
        ("DECR", [key]) => incr_by(store, key, -1),
        ("INCRBY", [key, delta]) => match parse_i64(delta) {
            Some(delta) => incr_by(store, key, delta),
            None => error("ERR value is not an integer or out of range"),
        },
        ("EXPIRE", [key, seconds]) => match parse_i64(seconds) {
            Some(seconds) => expire_at(
                store,
                key,
                SystemTime::now() + Duration::from_secs(seconds.max(0) as u64),
            ),
            None => error("ERR value is not an integer or out of range"),
        },
        ("PEXPIREAT", [key, millis]) => match parse_i64(millis) {
            Some(millis) => expire_at(store, key, UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)),
            None => error("ERR value is not an integer or out of range"),
        },
        ("TTL", [key]) => {
            if store.get(key).is_none() {
                return integer(-2);
            }
            match store.expires.get(key.as_slice()) {
                None => integer(-1),
                Some(at) => {
                    let left = at.duration_since(SystemTime::now()).unwrap_or_default();
                    integer(left.as_secs_f64().round() as i64)
                }
            }
        }
        ("HSET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            if store.get(key).is_none() {
                store.values.insert(key.clone(), Value::Hash(BTreeMap::new()));
            }
            let Some(Value::Hash(hash)) = store.get(key) else {
                return error(WRONGTYPE);
            };
            let mut added = 0;
            for pair in pairs.chunks(2) {
                if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                    added += 1;
                }
            }
            integer(added)
        }
        ("HGET", [key, field]) => match store.get(key) {
            None => nil(),
            Some(Value::Hash(hash)) => hash.get(field).map_or_else(nil, |value| bulk(value)),
            Some(_) => error(WRONGTYPE),
        },
        ("HGETALL", [key]) => match store.get(key) {
            None => array(Vec::new()),
            Some(Value::Hash(hash)) => array(
                hash.iter()
                    .flat_map(|(field, value)| [bulk(field), bulk(value)])
                    .collect(),
            ),
            Some(_) => error(WRONGTYPE),
        },
        ("HMGET", [key, fields @ ..]) if !fields.is_empty() => match store.get(key) {
            None => array(fields.iter().map(|_| nil()).collect()),
            Some(Value::Hash(hash)) => array(
                fields
                    .iter()
                    .map(|field| hash.get(field).map_or_else(nil, |value| bulk(value)))
                    .collect(),
            ),
            Some(_) => error(WRONGTYPE),
        },
        ("HKEYS", [key]) => match store.get(key) {
            None => array(Vec::new()),
            Some(Value::Hash(hash)) => array(hash.keys().map(|field| bulk(field)).collect()),
            Some(_) => error(WRONGTYPE),
        },
        ("RPUSH", [key, items @ ..]) if !items.is_empty() => {
            if store.get(key).is_none() {
                store.values.insert(key.clone(), Value::List(Vec::new()));
            }
            let Some(Value::List(list)) = store.get(key) else {
                return error(WRONGTYPE);
            };
            list.extend(items.iter().cloned());
            integer(list.len() as i64)
        }
        ("LPUSH", [key, items @ ..]) if !items.is_empty() => {
            if store.get(key).is_none() {
                store.values.insert(key.clone(), Value::List(Vec::new()));
            }
            let Some(Value::List(list)) = store.get(key) else {
                return error(WRONGTYPE);
            };
            for item in items {
                list.insert(0, item.clone());
            }
            integer(list.len() as i64)
        }
        ("LLEN", [key]) => match store.get(key) {
            None => integer(0),
            Some(Value::List(list)) => integer(list.len() as i64),
            Some(_) => error(WRONGTYPE),
        },
        ("LINDEX", [key, index]) => {
            let Some(index) = parse_i64(index) else {
                return error("ERR value is not an integer or out of range");
            };
            match store.get(key) {
                None => nil(),
                Some(Value::List(list)) => match list_index(list.len(), index) {
                    Some(at) => bulk(&list[at]),
                    None => nil(),
                },
                Some(_) => error(WRONGTYPE),
            }
        }
        ("LSET", [key, index, value]) => {
            let Some(index) = parse_i64(index) else {
                return error("ERR value is not an integer or out of range");
            };
            match store.get(key) {
                None => error("ERR no such key"),
                Some(Value::List(list)) => match list_index(list.len(), index) {
                    Some(at) => {
                        list[at] = value.clone();
                        simple("OK")
                    }
                    None => error("ERR index out of range"),
                },
                Some(_) => error(WRONGTYPE),
            }
        }
        ("LREM", [key, limit, value]) => {
            let Some(limit) = parse_i64(limit).filter(|limit| *limit >= 0) else {
                return error("ERR value is not an integer or out of range");
            };
            match store.get(key) {
                None => integer(0),
                Some(Value::List(list)) => {
                    let mut removed = 0;
                    list.retain(|item| {
                        let hit = item == value && (limit == 0 || removed < limit);
                        if hit {
                            removed += 1;
                        }
                        !hit
                    });
                    integer(removed)
                }
                Some(_) => error(WRONGTYPE),
            }
        }
        ("LPOS", [key, value]) => match store.get(key) {
            None => nil(),
            Some(Value::List(list)) => list
                .iter()
                .position(|item| item == value)
                .map_or_else(nil, |at| integer(at as i64)),
            Some(_) => error(WRONGTYPE),
        },
        ("LRANGE", [key, start, stop]) => {
            let (Some(start), Some(stop)) = (parse_i64(start), parse_i64(stop)) else {
                return error("ERR value is not an integer or out of range");
            };
            match store.get(key) {
                None => array(Vec::new()),
                Some(Value::List(list)) => {
                    let len = list.len() as i64;
                    let start = if start < 0 { (len + start).max(0) } else { start };
                    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                    if start > stop {
                        return array(Vec::new());
                    }
                    array(
                        list[start as usize..=stop as usize]
                            .iter()
                            .map(|item| bulk(item))
                            .collect(),
                    )
                }
                Some(_) => error(WRONGTYPE),
            }
        }
        ("SADD", [key, members @ ..]) if !members.is_empty() => {
            if store.get(key).is_none() {
                store.values.insert(key.clone(), Value::Set(BTreeSet::new()));
            }
            let Some(Value::Set(set)) = store.get(key) else {
                return error(WRONGTYPE);
            };
            integer(members.iter().filter(|member| set.insert((*member).clone())).count() as i64)
        }
        ("SMEMBERS", [key]) => match store.get(key) {
            None => array(Vec::new()),
            Some(Value::Set(set)) => array(set.iter().map(|member| bulk(member)).collect()),
            Some(_) => error(WRONGTYPE),
        },
        ("SREM", [key, members @ ..]) if !members.is_empty() => match store.get(key) {
            None => integer(0),
            Some(Value::Set(set)) => {
                integer(members.iter().filter(|member| set.remove(*member)).count() as i64)
            }
            Some(_) => error(WRONGTYPE),
        },
        ("ZADD", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            let mut scored = Vec::with_capacity(pairs.len() / 2);
            for pair in pairs.chunks(2) {
                let Some(score) = parse_f64(&pair[0]) else {
                    return error("ERR value is not a valid float");
                };
                scored.push((pair[1].clone(), score));
            }
            if store.get(key).is_none() {
                store.values.insert(key.clone(), Value::SortedSet(HashMap::new()));
            }
            let Some(Value::SortedSet(zset)) = store.get(key) else {
                return error(WRONGTYPE);
            };
            let added = scored
                .into_iter()
                .filter(|(member, score)| zset.insert(member.clone(), *score).is_none())
                .count();
            integer(added as i64)
        }
        ("ZINCRBY", [key, delta, member]) => {
            let Some(delta) = parse_f64(delta) else {
                return error("ERR value is not a valid float");
            };
            if store.get(key).is_none() {
                store.values.insert(key.clone(), Value::SortedSet(HashMap::new()));
            }
            let Some(Value::SortedSet(zset)) = store.get(key) else {
                return error(WRONGTYPE);
            };
            let score = zset.entry(member.clone()).or_insert(0.0);
            *score += delta;
            bulk(format!("{score}").as_bytes())
        }
        ("ZREM", [key, members @ ..]) if !members.is_empty() => match store.get(key) {
            None => integer(0),
            Some(Value::SortedSet(zset)) => {
                integer(members.iter().filter(|member| zset.remove(*member).is_some()).count() as i64)
            }
            Some(_) => error(WRONGTYPE),
        },
        (name, [key, rest @ ..]) if name.starts_with('Z') => match store.get(key) {
            None => sorted_query(name, &HashMap::new(), rest),
            Some(Value::SortedSet(zset)) => sorted_query(name, zset, rest),
            Some(_) => error(WRONGTYPE),
        },
        ("SISMEMBER", [key, member]) => match store.get(key) {
            None => integer(0),
            Some(Value::Set(set)) => integer(set.contains(member) as i64),
            Some(_) => error(WRONGTYPE),
        },
        _ => error(&format!("ERR unknown command '{name}'")),
    }
}

/// Read-only sorted set commands.
fn sorted_query(name: &str, zset: &HashMap<Vec<u8>, f64>, args: &[Vec<u8>]) -> Vec<u8> {
    let mut ranked: Vec<(&Vec<u8>, f64)> = zset.iter().map(|(member, score)| (member, *score)).collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    let with_scores = |items: Vec<(&Vec<u8>, f64)>| {
        array(
            items
                .into_iter()
                .flat_map(|(member, score)| [bulk(member), bulk(format!("{score}").as_bytes())])
                .collect(),
        )
    };

    match (name, args) {
        ("ZCARD", []) => integer(ranked.len() as i64),
        ("ZCOUNT", [min, max]) => match (parse_f64(min), parse_f64(max)) {
            (Some(min), Some(max)) => integer(within(&ranked, min, max).len() as i64),
            _ => error("ERR min or max is not a float"),
        },
        ("ZRANK" | "ZREVRANK", [member]) => {
            if name == "ZREVRANK" {
                ranked.reverse();
            }
            ranked
                .iter()
                .position(|(candidate, _)| *candidate == member)
                .map_or_else(nil, |at| integer(at as i64))
        }
        ("ZRANGE" | "ZREVRANGE", [start, stop, flag]) if flag.eq_ignore_ascii_case(b"WITHSCORES") => {
            if name == "ZREVRANGE" {
                ranked.reverse();
            }
            let (Some(start), Some(stop)) = (parse_i64(start), parse_i64(stop)) else {
                return error("ERR value is not an integer or out of range");
            };
            let len = ranked.len() as i64;
            let start = if start < 0 { (len + start).max(0) } else { start };
            let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
            if start > stop {
                return array(Vec::new());
            }
            with_scores(ranked[start as usize..=stop as usize].to_vec())
        }
        ("ZRANGEBYSCORE", [min, max, flag]) if flag.eq_ignore_ascii_case(b"WITHSCORES") => {
            match (parse_f64(min), parse_f64(max)) {
                (Some(min), Some(max)) => with_scores(within(&ranked, min, max)),
                _ => error("ERR min or max is not a float"),
            }
        }
        ("ZMSCORE", members) if !members.is_empty() => array(
            members
                .iter()
                .map(|member| {
                    zset.get(member)
                        .map_or_else(nil, |score| bulk(format!("{score}").as_bytes()))
                })
                .collect(),
        ),
        _ => error(&format!("ERR unknown command '{name}'")),
    }
}

fn within<'a>(ranked: &[(&'a Vec<u8>, f64)], min: f64, max: f64) -> Vec<(&'a Vec<u8>, f64)> {
    ranked
        .iter()
        .filter(|(_, score)| *score >= min && *score <= max)
        .cloned()
        .collect()
}

/// Resolves a possibly negative list index.
fn list_index(len: usize, index: i64) -> Option<usize> {
    let at = if index < 0 { len as i64 + index } else { index };
    usize::try_from(at).ok().filter(|at| *at < len)
}

fn incr_by(store: &mut Store, key: &[u8], delta: i64) -> Vec<u8> {
    let current = match store.get(key) {
        None => 0,
        Some(Value::Str(data)) => match parse_i64(data) {
            Some(value) => value,
            None => return error("ERR value is not an integer or out of range"),
        },
        Some(_) => return error(WRONGTYPE),
    };
    let next = current + delta;
    store
        .values
        .insert(key.to_vec(), Value::Str(next.to_string().into_bytes()));
    integer(next)
}

fn expire_at(store: &mut Store, key: &[u8], at: SystemTime) -> Vec<u8> {
    if store.get(key).is_none() {
        return integer(0);
    }
    store.expires.insert(key.to_vec(), at);
    integer(1)
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn parse_f64(data: &[u8]) -> Option<f64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn simple(text: &str) -> Vec<u8> {
    format!("+{text}\r\n").into_bytes()
}

fn error(text: &str) -> Vec<u8> {
    format!("-{text}\r\n").into_bytes()
}

fn integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn nil() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend_from_slice(&item);
    }
    out
}
