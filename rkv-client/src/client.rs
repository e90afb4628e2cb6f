//! # Command Client API
//!
//! Purpose: Expose typed helpers for common key/value, counter, hash, list,
//! set and sorted set commands on top of a single connection or a pool.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides checkout, framing and reply shapes.
//! 2. **Explicit Injection**: The caller builds the connection or pool and
//!    hands it in; there is no process-wide default client.
//! 3. **Typed Errors**: Error replies become [`ClientError::Server`]; replies of
//!    the wrong shape become [`ClientError::UnexpectedResponse`].
//! 4. **One Checkout Per Call**: With a pool, every call borrows a connection
//!    for exactly one request (or one pipelined batch).

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rkv_common::{Arg, Command, Pipeline, ReplyValue};

use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::pool::Pool;
use crate::value::FieldValue;

/// TTL state returned by the server, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Where [`Client::add_to_list`] inserts new items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPosition {
    /// After the last item.
    Append,
    /// Before the first item, keeping the order of the inserted items.
    Prepend,
    /// Before the item currently at this index. Negative indexes count from
    /// the end; out-of-range indexes clamp to either end.
    At(i64),
}

/// Rank direction for sorted set lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOrder {
    /// Lowest score first.
    Ascending,
    /// Highest score first.
    Descending,
}

/// Placeholder written over a list item just before it is removed.
const REMOVED_ITEM: &str = "\u{0}rkv:removed";

#[derive(Clone)]
enum Backend {
    Connection(Connection),
    Pool(Pool),
}

/// Command façade over a [`Connection`] or a [`Pool`].
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct Client {
    backend: Backend,
}

impl From<Connection> for Client {
    fn from(conn: Connection) -> Self {
        Client::with_connection(conn)
    }
}

impl From<Pool> for Client {
    fn from(pool: Pool) -> Self {
        Client::with_pool(pool)
    }
}

impl Client {
    /// Issues every command on one connection. The connection must be READY
    /// for calls to succeed.
    pub fn with_connection(conn: Connection) -> Self {
        Client {
            backend: Backend::Connection(conn),
        }
    }

    /// Checks a connection out of `pool` for every call.
    pub fn with_pool(pool: Pool) -> Self {
        Client {
            backend: Backend::Pool(pool),
        }
    }

    /// Sends a command and returns its reply; error replies become
    /// [`ClientError::Server`].
    pub async fn raw(&self, command: Command) -> ClientResult<ReplyValue> {
        let reply = match &self.backend {
            Backend::Connection(conn) => conn.send(command).await?,
            Backend::Pool(pool) => {
                let conn = pool.get().await?;
                conn.send(command).await?
            }
        };
        match reply {
            ReplyValue::Error(err) => Err(ClientError::Server(err)),
            reply => Ok(reply),
        }
    }

    /// Sends every command of `pipeline` in one write. Error replies are kept
    /// in place so one failing command does not hide the others.
    pub async fn pipeline(&self, pipeline: &Pipeline) -> ClientResult<Vec<ReplyValue>> {
        match &self.backend {
            Backend::Connection(conn) => conn.pipeline(pipeline).await,
            Backend::Pool(pool) => {
                let conn = pool.get().await?;
                conn.pipeline(pipeline).await
            }
        }
    }

    /// Pings the server and returns its answer, normally `PONG`.
    pub async fn ping(&self) -> ClientResult<String> {
        match self.raw(Command::new("PING")).await? {
            ReplyValue::SimpleString(pong) => Ok(pong),
            reply => text(reply),
        }
    }

    /// Fetches a value by key. Returns `Ok(None)` when the key is missing.
    pub async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        optional_text(self.raw(Command::new("GET").arg(key)).await?)
    }

    /// Fetches a value by key without UTF-8 validation.
    pub async fn get_bytes(&self, key: &str) -> ClientResult<Option<Bytes>> {
        match self.raw(Command::new("GET").arg(key)).await? {
            ReplyValue::BulkString(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value for a key without expiration.
    pub async fn set(&self, key: &str, value: impl Into<Arg>) -> ClientResult<()> {
        ok(self.raw(Command::new("SET").arg(key).arg(value)).await?)
    }

    /// Sets a value and attaches an expiration in whole seconds.
    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: impl Into<Arg>,
        ttl: Duration,
    ) -> ClientResult<()> {
        let command = Command::new("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1));
        ok(self.raw(command).await?)
    }

    /// Fetches several keys at once, `None` for each missing key.
    pub async fn mget<K: AsRef<str>>(&self, keys: &[K]) -> ClientResult<Vec<Option<String>>> {
        let command = Command::new("MGET").args(keys.iter().map(AsRef::as_ref));
        array(self.raw(command).await?)?
            .into_iter()
            .map(optional_text)
            .collect()
    }

    /// Sets several key/value pairs at once.
    pub async fn mset<I, K, V>(&self, pairs: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Arg>,
        V: Into<Arg>,
    {
        let mut command = Command::new("MSET");
        for (key, value) in pairs {
            command.push(key);
            command.push(value);
        }
        ok(self.raw(command).await?)
    }

    /// Deletes keys. Returns how many existed.
    pub async fn delete<K: AsRef<str>>(&self, keys: &[K]) -> ClientResult<u64> {
        let command = Command::new("DEL").args(keys.iter().map(AsRef::as_ref));
        count(self.raw(command).await?)
    }

    /// Returns how many of `keys` exist.
    pub async fn exists<K: AsRef<str>>(&self, keys: &[K]) -> ClientResult<u64> {
        let command = Command::new("EXISTS").args(keys.iter().map(AsRef::as_ref));
        count(self.raw(command).await?)
    }

    pub async fn incr(&self, key: &str) -> ClientResult<i64> {
        integer(self.raw(Command::new("INCR").arg(key)).await?)
    }

    pub async fn decr(&self, key: &str) -> ClientResult<i64> {
        integer(self.raw(Command::new("DECR").arg(key)).await?)
    }

    /// Adds `delta` (possibly negative) and returns the new value.
    pub async fn incr_by(&self, key: &str, delta: i64) -> ClientResult<i64> {
        integer(self.raw(Command::new("INCRBY").arg(key).arg(delta)).await?)
    }

    /// Stores an integer counter and returns the stored value.
    pub async fn set_counter(&self, key: &str, value: i64) -> ClientResult<i64> {
        self.set(key, value).await?;
        Ok(value)
    }

    /// Reads a counter. Returns `Ok(None)` when the key is missing.
    pub async fn get_counter(&self, key: &str) -> ClientResult<Option<i64>> {
        match self.get(key).await? {
            Some(text) => text
                .parse()
                .map(Some)
                .map_err(|_| ClientError::UnexpectedResponse),
            None => Ok(None),
        }
    }

    /// Sets a time-to-live in whole seconds. Returns true when the TTL was set.
    pub async fn expire(&self, key: &str, ttl: Duration) -> ClientResult<bool> {
        let command = Command::new("EXPIRE").arg(key).arg(ttl.as_secs());
        flag(self.raw(command).await?)
    }

    /// Expires a key at an absolute time. Returns true when the TTL was set.
    pub async fn expire_at(&self, key: &str, at: SystemTime) -> ClientResult<bool> {
        let millis = at
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis())
            .unwrap_or(0);
        let millis = u64::try_from(millis).unwrap_or(u64::MAX);
        let command = Command::new("PEXPIREAT").arg(key).arg(millis);
        flag(self.raw(command).await?)
    }

    /// Returns TTL status for a key.
    pub async fn ttl(&self, key: &str) -> ClientResult<ClientTtl> {
        match integer(self.raw(Command::new("TTL").arg(key)).await?)? {
            -2 => Ok(ClientTtl::Missing),
            -1 => Ok(ClientTtl::NoExpiry),
            seconds if seconds >= 0 => Ok(ClientTtl::ExpiresIn(Duration::from_secs(seconds as u64))),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Stores every field of an object in a hash. An empty object is a no-op.
    pub async fn set_object<I, F>(&self, key: &str, fields: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = (F, FieldValue)>,
        F: Into<Arg>,
    {
        let mut command = Command::new("HSET").arg(key);
        let mut empty = true;
        for (field, value) in fields {
            command.push(field);
            command.push(value);
            empty = false;
        }
        if empty {
            return Ok(());
        }
        integer(self.raw(command).await?).map(|_| ())
    }

    /// Reads a hash written by [`Client::set_object`]. A missing key yields an
    /// empty map.
    pub async fn get_object(&self, key: &str) -> ClientResult<HashMap<String, FieldValue>> {
        let items = array(self.raw(Command::new("HGETALL").arg(key)).await?)?;
        if items.len() % 2 != 0 {
            return Err(ClientError::UnexpectedResponse);
        }
        let mut object = HashMap::with_capacity(items.len() / 2);
        let mut items = items.into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            object.insert(text(field)?, FieldValue::decode(&text(value)?));
        }
        Ok(object)
    }

    /// Stores one hash field.
    pub async fn set_hash_field(
        &self,
        key: &str,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> ClientResult<()> {
        let value: FieldValue = value.into();
        let command = Command::new("HSET").arg(key).arg(field).arg(value);
        integer(self.raw(command).await?).map(|_| ())
    }

    /// Reads one hash field. Returns `Ok(None)` when it is missing.
    pub async fn get_hash_field(&self, key: &str, field: &str) -> ClientResult<Option<FieldValue>> {
        let reply = self.raw(Command::new("HGET").arg(key).arg(field)).await?;
        Ok(optional_text(reply)?.map(|raw| FieldValue::decode(&raw)))
    }

    /// Stores several hash fields in one call. An empty input is a no-op.
    pub async fn set_multiple_hash_fields<I, F>(&self, key: &str, fields: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = (F, FieldValue)>,
        F: Into<Arg>,
    {
        self.set_object(key, fields).await
    }

    /// Reads several hash fields, `None` for each missing one.
    pub async fn get_multiple_hash_fields<F: AsRef<str>>(
        &self,
        key: &str,
        fields: &[F],
    ) -> ClientResult<Vec<Option<FieldValue>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let command = Command::new("HMGET")
            .arg(key)
            .args(fields.iter().map(AsRef::as_ref));
        array(self.raw(command).await?)?
            .into_iter()
            .map(|item| Ok(optional_text(item)?.map(|raw| FieldValue::decode(&raw))))
            .collect()
    }

    /// Lists the field names of a hash.
    pub async fn get_hash_fields(&self, key: &str) -> ClientResult<Vec<String>> {
        array(self.raw(Command::new("HKEYS").arg(key)).await?)?
            .into_iter()
            .map(text)
            .collect()
    }

    /// Appends values to a list. Returns the new list length.
    pub async fn write_list(&self, key: &str, items: &[FieldValue]) -> ClientResult<u64> {
        if items.is_empty() {
            return Ok(0);
        }
        let command = Command::new("RPUSH").arg(key).args(items);
        count(self.raw(command).await?)
    }

    /// Reads a whole list.
    pub async fn read_list(&self, key: &str) -> ClientResult<Vec<FieldValue>> {
        let command = Command::new("LRANGE").arg(key).arg(0i64).arg(-1i64);
        array(self.raw(command).await?)?
            .into_iter()
            .map(|item| text(item).map(|raw| FieldValue::decode(&raw)))
            .collect()
    }

    /// Inserts items into a list. Returns the new list length.
    ///
    /// [`ListPosition::At`] rewrites the whole list and is not atomic with
    /// respect to other writers.
    pub async fn add_to_list(
        &self,
        key: &str,
        items: &[FieldValue],
        position: ListPosition,
    ) -> ClientResult<u64> {
        if items.is_empty() {
            return count(self.raw(Command::new("LLEN").arg(key)).await?);
        }
        match position {
            ListPosition::Append => self.write_list(key, items).await,
            ListPosition::Prepend => {
                let command = Command::new("LPUSH").arg(key).args(items.iter().rev());
                count(self.raw(command).await?)
            }
            ListPosition::At(index) => {
                let mut list = self.read_list(key).await?;
                let len = list.len() as i64;
                let at = (if index < 0 { len + index } else { index }).clamp(0, len) as usize;
                list.splice(at..at, items.iter().cloned());

                let pipeline = Pipeline::new()
                    .cmd(Command::new("DEL").arg(key))
                    .cmd(Command::new("RPUSH").arg(key).args(&list));
                let mut replies = self.pipeline(&pipeline).await?;
                let pushed = replies.pop().ok_or(ClientError::UnexpectedResponse)?;
                count(server_error(pushed)?)
            }
        }
    }

    /// Reads the item at `index`; negative indexes count from the end.
    pub async fn get_list_item_at(&self, key: &str, index: i64) -> ClientResult<Option<FieldValue>> {
        let reply = self.raw(Command::new("LINDEX").arg(key).arg(index)).await?;
        Ok(optional_text(reply)?.map(|raw| FieldValue::decode(&raw)))
    }

    /// Replaces the item at `index`. Fails with a server error when the index
    /// is out of range.
    pub async fn set_list_item_at(
        &self,
        key: &str,
        value: impl Into<FieldValue>,
        index: i64,
    ) -> ClientResult<()> {
        let value: FieldValue = value.into();
        ok(self.raw(Command::new("LSET").arg(key).arg(index).arg(value)).await?)
    }

    /// Removes the item at `index`. Returns false when nothing was removed.
    pub async fn remove_list_item_at(&self, key: &str, index: i64) -> ClientResult<bool> {
        let pipeline = Pipeline::new()
            .cmd(Command::new("LSET").arg(key).arg(index).arg(REMOVED_ITEM))
            .cmd(Command::new("LREM").arg(key).arg(1i64).arg(REMOVED_ITEM));
        let mut replies = self.pipeline(&pipeline).await?.into_iter();
        let (Some(set), Some(removed)) = (replies.next(), replies.next()) else {
            return Err(ClientError::UnexpectedResponse);
        };
        if let ReplyValue::Error(err) = set {
            // LSET fails on a missing key or index; LREM then found nothing.
            if err.message.contains("no such key") || err.message.contains("index out of range") {
                return Ok(false);
            }
            return Err(ClientError::Server(err));
        }
        flag(server_error(removed)?)
    }

    /// Index of the first item equal to `item`, if any.
    pub async fn find_item_in_list(
        &self,
        key: &str,
        item: impl Into<FieldValue>,
    ) -> ClientResult<Option<u64>> {
        let item: FieldValue = item.into();
        match self.raw(Command::new("LPOS").arg(key).arg(item)).await? {
            ReplyValue::BulkString(None) => Ok(None),
            reply => count(reply).map(Some),
        }
    }

    /// Adds members to a set. Returns how many were new.
    pub async fn add_to_set<I, M>(&self, key: &str, members: I) -> ClientResult<u64>
    where
        I: IntoIterator<Item = M>,
        M: Into<Arg>,
    {
        let command = Command::new("SADD").arg(key).args(members);
        if command.len() == 2 {
            return Ok(0);
        }
        count(self.raw(command).await?)
    }

    /// Lists the members of a set, in server order.
    pub async fn get_set_items(&self, key: &str) -> ClientResult<Vec<String>> {
        array(self.raw(Command::new("SMEMBERS").arg(key)).await?)?
            .into_iter()
            .map(text)
            .collect()
    }

    pub async fn is_item_in_set(&self, key: &str, member: impl Into<Arg>) -> ClientResult<bool> {
        flag(self.raw(Command::new("SISMEMBER").arg(key).arg(member)).await?)
    }

    /// Removes members from a set. Returns how many were present.
    pub async fn remove_items_from_set<I, M>(&self, key: &str, members: I) -> ClientResult<u64>
    where
        I: IntoIterator<Item = M>,
        M: Into<Arg>,
    {
        let command = Command::new("SREM").arg(key).args(members);
        if command.len() == 2 {
            return Ok(0);
        }
        count(self.raw(command).await?)
    }

    /// Adds or updates scored members. Returns how many were new.
    pub async fn z_add_to_set<I, M>(&self, key: &str, members: I) -> ClientResult<u64>
    where
        I: IntoIterator<Item = (M, f64)>,
        M: Into<Arg>,
    {
        let mut command = Command::new("ZADD").arg(key);
        for (member, score) in members {
            command.push(score);
            command.push(member);
        }
        if command.len() == 2 {
            return Ok(0);
        }
        count(self.raw(command).await?)
    }

    /// Number of members in a sorted set.
    pub async fn z_get_count(&self, key: &str) -> ClientResult<u64> {
        count(self.raw(Command::new("ZCARD").arg(key)).await?)
    }

    /// Number of members whose score lies in `min..=max`.
    pub async fn z_get_count_with_score_in(&self, key: &str, min: f64, max: f64) -> ClientResult<u64> {
        count(self.raw(Command::new("ZCOUNT").arg(key).arg(min).arg(max)).await?)
    }

    /// Zero-based rank of a member, `None` when it is absent.
    pub async fn z_get_rank(
        &self,
        key: &str,
        member: impl Into<Arg>,
        order: ScoreOrder,
    ) -> ClientResult<Option<u64>> {
        let name = match order {
            ScoreOrder::Ascending => "ZRANK",
            ScoreOrder::Descending => "ZREVRANK",
        };
        match self.raw(Command::new(name).arg(key).arg(member)).await? {
            ReplyValue::BulkString(None) => Ok(None),
            reply => count(reply).map(Some),
        }
    }

    /// Adds `delta` to a member's score and returns the new score.
    pub async fn z_incr_by(&self, key: &str, member: impl Into<Arg>, delta: f64) -> ClientResult<f64> {
        score(self.raw(Command::new("ZINCRBY").arg(key).arg(delta).arg(member)).await?)
    }

    /// The `count` highest scored members, best first.
    pub async fn z_get_top_items(&self, key: &str, count: usize) -> ClientResult<Vec<(String, f64)>> {
        self.z_range(key, count, "ZREVRANGE").await
    }

    /// The `count` lowest scored members, lowest first.
    pub async fn z_get_bottom_items(&self, key: &str, count: usize) -> ClientResult<Vec<(String, f64)>> {
        self.z_range(key, count, "ZRANGE").await
    }

    async fn z_range(&self, key: &str, count: usize, name: &str) -> ClientResult<Vec<(String, f64)>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let command = Command::new(name)
            .arg(key)
            .arg(0i64)
            .arg(count - 1)
            .arg("WITHSCORES");
        scored(self.raw(command).await?)
    }

    /// Members whose score lies in `min..=max`, lowest first.
    pub async fn z_get_items_with_scores_in(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> ClientResult<Vec<(String, f64)>> {
        let command = Command::new("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .arg("WITHSCORES");
        scored(self.raw(command).await?)
    }

    /// Scores of the given members, `None` for each absent one.
    pub async fn z_get_scores_of_members<M: AsRef<str>>(
        &self,
        key: &str,
        members: &[M],
    ) -> ClientResult<Vec<Option<f64>>> {
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let command = Command::new("ZMSCORE")
            .arg(key)
            .args(members.iter().map(AsRef::as_ref));
        array(self.raw(command).await?)?
            .into_iter()
            .map(|item| match item {
                ReplyValue::BulkString(None) => Ok(None),
                item => score(item).map(Some),
            })
            .collect()
    }

    /// Removes members from a sorted set. Returns how many were present.
    pub async fn z_remove_members<I, M>(&self, key: &str, members: I) -> ClientResult<u64>
    where
        I: IntoIterator<Item = M>,
        M: Into<Arg>,
    {
        let command = Command::new("ZREM").arg(key).args(members);
        if command.len() == 2 {
            return Ok(0);
        }
        count(self.raw(command).await?)
    }
}

/// Lifts an error reply taken from a pipeline.
fn server_error(reply: ReplyValue) -> ClientResult<ReplyValue> {
    match reply {
        ReplyValue::Error(err) => Err(ClientError::Server(err)),
        reply => Ok(reply),
    }
}

fn ok(reply: ReplyValue) -> ClientResult<()> {
    match reply {
        ReplyValue::SimpleString(_) => Ok(()),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

fn integer(reply: ReplyValue) -> ClientResult<i64> {
    reply.as_integer().ok_or(ClientError::UnexpectedResponse)
}

fn count(reply: ReplyValue) -> ClientResult<u64> {
    u64::try_from(integer(reply)?).map_err(|_| ClientError::UnexpectedResponse)
}

fn flag(reply: ReplyValue) -> ClientResult<bool> {
    integer(reply).map(|value| value == 1)
}

fn score(reply: ReplyValue) -> ClientResult<f64> {
    text(reply)?
        .parse()
        .map_err(|_| ClientError::UnexpectedResponse)
}

/// Pairs a `WITHSCORES` reply into `(member, score)`.
fn scored(reply: ReplyValue) -> ClientResult<Vec<(String, f64)>> {
    let items = array(reply)?;
    if items.len() % 2 != 0 {
        return Err(ClientError::UnexpectedResponse);
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(member), Some(value)) = (items.next(), items.next()) {
        pairs.push((text(member)?, score(value)?));
    }
    Ok(pairs)
}

fn array(reply: ReplyValue) -> ClientResult<Vec<ReplyValue>> {
    match reply {
        ReplyValue::Array(items) => Ok(items.unwrap_or_default()),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

fn text(reply: ReplyValue) -> ClientResult<String> {
    optional_text(reply)?.ok_or(ClientError::UnexpectedResponse)
}

fn optional_text(reply: ReplyValue) -> ClientResult<Option<String>> {
    match reply {
        ReplyValue::BulkString(None) => Ok(None),
        ReplyValue::BulkString(Some(data)) => String::from_utf8(data.to_vec())
            .map(Some)
            .map_err(|_| ClientError::UnexpectedResponse),
        ReplyValue::SimpleString(text) => Ok(Some(text)),
        _ => Err(ClientError::UnexpectedResponse),
    }
}
