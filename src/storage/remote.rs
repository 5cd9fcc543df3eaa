/// Remote key-value backend speaking RESP over TCP

use super::resp::{RespEncoder, RespParser, RespValue};
use super::RecordStore;
use crate::config::RedisConfig;
use crate::core::Record;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::BytesMut;
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Connection {
    async fn send(&mut self, command: &RespValue) -> StorageResult<RespValue> {
        let encoded = RespEncoder::encode(command);
        self.stream.write_all(&encoded).await?;

        loop {
            if let Some(reply) = RespParser::parse(&mut self.buffer)
                .map_err(|e| StorageError::protocol(e.to_string()))?
            {
                return Ok(reply);
            }
            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return Err(StorageError::connection("connection closed by server"));
            }
        }
    }
}

/// Remote KV backend.
///
/// Records are stored as JSON blobs under their key. A single connection
/// is cached and transparently re-established after a transport error.
pub struct RemoteStore {
    address: String,
    db: u32,
    password: Option<String>,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl RemoteStore {
    /// Connect and verify the server answers PING
    pub async fn connect(config: &RedisConfig) -> StorageResult<Self> {
        let store = Self {
            address: config.address(),
            db: config.db,
            password: config.password.clone(),
            timeout: config.timeout(),
            connection: Mutex::new(None),
        };

        match store.execute("PING", &[]).await? {
            RespValue::SimpleString(ref s) if s == "PONG" => {}
            other => {
                return Err(StorageError::connection(format!(
                    "unexpected PING reply from {}: {:?}",
                    store.address, other
                )))
            }
        }

        debug!("Connected to remote KV at {}", store.address);
        Ok(store)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn open(&self) -> StorageResult<Connection> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| StorageError::connection(format!("{}: {}", self.address, e)))?;
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            stream,
            buffer: BytesMut::with_capacity(4096),
        };

        if let Some(password) = &self.password {
            let auth = RespEncoder::create_command("AUTH", &[password.as_bytes()]);
            expect_ok(conn.send(&auth).await?, "AUTH")?;
        }
        if self.db != 0 {
            let db = self.db.to_string();
            let select = RespEncoder::create_command("SELECT", &[db.as_bytes()]);
            expect_ok(conn.send(&select).await?, "SELECT")?;
        }

        Ok(conn)
    }

    /// Run one command on the cached connection, reconnecting if needed.
    ///
    /// Server error replies become `Protocol` errors; transport failures
    /// and timeouts drop the cached connection.
    async fn execute(&self, command: &str, args: &[&[u8]]) -> StorageResult<RespValue> {
        let request = RespEncoder::create_command(command, args);
        let mut slot = self.connection.lock().await;

        let result = timeout(self.timeout, async {
            if slot.is_none() {
                *slot = Some(self.open().await?);
            }
            match slot.as_mut() {
                Some(conn) => conn.send(&request).await,
                None => Err(StorageError::connection("no connection")),
            }
        })
        .await
        .unwrap_or_else(|_| {
            Err(StorageError::connection(format!(
                "{} timed out after {:?}",
                command, self.timeout
            )))
        });

        match result {
            Ok(RespValue::Error(message)) => Err(StorageError::protocol(message)),
            Ok(reply) => Ok(reply),
            Err(e) => {
                if slot.take().is_some() {
                    warn!("Dropping remote KV connection to {}: {}", self.address, e);
                }
                Err(e)
            }
        }
    }
}

fn expect_ok(reply: RespValue, command: &str) -> StorageResult<()> {
    match reply {
        RespValue::SimpleString(_) => Ok(()),
        RespValue::Error(message) => Err(StorageError::connection(format!(
            "{} rejected: {}",
            command, message
        ))),
        other => Err(StorageError::protocol(format!(
            "unexpected {} reply: {:?}",
            command, other
        ))),
    }
}

fn expect_integer(reply: RespValue, command: &str) -> StorageResult<i64> {
    match reply {
        RespValue::Integer(n) => Ok(n),
        other => Err(StorageError::protocol(format!(
            "unexpected {} reply: {:?}",
            command, other
        ))),
    }
}

#[async_trait]
impl RecordStore for RemoteStore {
    async fn store(&self, key: &str, record: &Record) -> StorageResult<()> {
        let blob = serde_json::to_vec(record)?;
        let reply = self.execute("SET", &[key.as_bytes(), blob.as_slice()]).await?;
        expect_ok(reply, "SET")
    }

    async fn retrieve(&self, key: &str) -> StorageResult<Option<Record>> {
        match self.execute("GET", &[key.as_bytes()]).await? {
            RespValue::BulkString(None) => Ok(None),
            RespValue::BulkString(Some(blob)) => Ok(Some(serde_json::from_slice(&blob)?)),
            other => Err(StorageError::protocol(format!("unexpected GET reply: {:?}", other))),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let reply = self.execute("DEL", &[key.as_bytes()]).await?;
        Ok(expect_integer(reply, "DEL")? > 0)
    }

    async fn list_keys(&self) -> StorageResult<HashSet<String>> {
        match self.execute("KEYS", &[&b"*"[..]]).await? {
            RespValue::Array(None) => Ok(HashSet::new()),
            RespValue::Array(Some(items)) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::BulkString(Some(raw)) => String::from_utf8(raw.to_vec())
                        .map_err(|e| StorageError::protocol(e.to_string())),
                    other => Err(StorageError::protocol(format!(
                        "unexpected KEYS element: {:?}",
                        other
                    ))),
                })
                .collect(),
            other => Err(StorageError::protocol(format!("unexpected KEYS reply: {:?}", other))),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let reply = self.execute("EXISTS", &[key.as_bytes()]).await?;
        Ok(expect_integer(reply, "EXISTS")? > 0)
    }

    fn backend_name(&self) -> &'static str {
        "RemoteStore"
    }
}
