use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, U256};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::error::StoreError;
use crate::format::format_ether;
use crate::models::{AssetPrice, Balance, NewTrade, Nft, Trade, User};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  address        TEXT PRIMARY KEY,
  is_whitelisted INTEGER NOT NULL DEFAULT 0,
  is_blacklisted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS assets (
  symbol TEXT PRIMARY KEY,
  price  TEXT NOT NULL -- U256 stored as base-10 string
);

CREATE TABLE IF NOT EXISTS balances (
  address TEXT NOT NULL,
  symbol  TEXT NOT NULL,
  balance TEXT NOT NULL, -- U256 stored as base-10 string
  PRIMARY KEY (address, symbol)
);

CREATE TABLE IF NOT EXISTS trades (
  id        INTEGER PRIMARY KEY AUTOINCREMENT,
  buyer     TEXT,
  seller    TEXT,
  amount    TEXT NOT NULL,
  price     TEXT,
  timestamp INTEGER NOT NULL -- unix millis
);

CREATE INDEX IF NOT EXISTS trades_by_time ON trades (timestamp DESC);

CREATE TABLE IF NOT EXISTS nfts (
  token_id TEXT PRIMARY KEY,
  owner    TEXT NOT NULL,
  uri      TEXT NOT NULL,
  listed   INTEGER NOT NULL DEFAULT 0,
  seller   TEXT,
  price    TEXT
);
"#;

/// Canonical key form of an address (EIP-55 checksum).
pub fn address_key(address: Address) -> String {
    address.to_checksum(None)
}

/// Connect to SQLite (with WAL mode for file databases)
pub fn connect(path: &str) -> Result<Connection, StoreError> {
    if path == ":memory:" {
        return Ok(Connection::open_in_memory()?);
    }
    let conn = Connection::open(path)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    Ok(conn)
}

/// Create the schema if absent
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

fn parse_u256(column: &'static str, value: &str) -> Result<U256, StoreError> {
    U256::from_str_radix(value, 10).map_err(|_| StoreError::Corrupt {
        column,
        value: value.to_string(),
    })
}

/// Set the whitelist flag. Setting creates the user; clearing only touches
/// an existing row. Returns the number of rows changed.
pub fn set_whitelisted(conn: &Connection, address: &str, on: bool) -> Result<usize, StoreError> {
    let changed = if on {
        conn.execute(
            "INSERT INTO users (address, is_whitelisted) VALUES (?1, 1)
             ON CONFLICT(address) DO UPDATE SET is_whitelisted = 1",
            params![address],
        )?
    } else {
        conn.execute(
            "UPDATE users SET is_whitelisted = 0 WHERE address = ?1",
            params![address],
        )?
    };
    Ok(changed)
}

/// Blacklist counterpart of [`set_whitelisted`]; the whitelist flag is left alone.
pub fn set_blacklisted(conn: &Connection, address: &str, on: bool) -> Result<usize, StoreError> {
    let changed = if on {
        conn.execute(
            "INSERT INTO users (address, is_blacklisted) VALUES (?1, 1)
             ON CONFLICT(address) DO UPDATE SET is_blacklisted = 1",
            params![address],
        )?
    } else {
        conn.execute(
            "UPDATE users SET is_blacklisted = 0 WHERE address = ?1",
            params![address],
        )?
    };
    Ok(changed)
}

pub fn upsert_balance(
    conn: &Connection,
    address: &str,
    symbol: &str,
    balance: U256,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO balances (address, symbol, balance) VALUES (?1, ?2, ?3)
         ON CONFLICT(address, symbol) DO UPDATE SET balance = excluded.balance",
        params![address, symbol, balance.to_string()],
    )?;
    Ok(())
}

pub fn upsert_price(conn: &Connection, symbol: &str, price: U256) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO assets (symbol, price) VALUES (?1, ?2)
         ON CONFLICT(symbol) DO UPDATE SET price = excluded.price",
        params![symbol, price.to_string()],
    )?;
    Ok(())
}

/// Append a trade. There is no natural key, so the same event seen twice
/// is stored twice.
pub fn insert_trade(conn: &Connection, trade: &NewTrade) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO trades (buyer, seller, amount, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![
            trade.buyer.map(address_key),
            trade.seller.map(address_key),
            trade.amount,
            trade.timestamp
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn upsert_nft(conn: &Connection, nft: &Nft) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO nfts (token_id, owner, uri, listed, seller, price)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(token_id) DO UPDATE SET
             owner  = excluded.owner,
             uri    = excluded.uri,
             listed = excluded.listed,
             seller = excluded.seller,
             price  = excluded.price",
        params![nft.token_id, nft.owner, nft.uri, nft.listed, nft.seller, nft.price],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, address: &str) -> Result<Option<User>, StoreError> {
    let user = conn
        .query_row(
            "SELECT address, is_whitelisted, is_blacklisted FROM users WHERE address = ?1",
            params![address],
            |r| {
                Ok(User {
                    address: r.get(0)?,
                    is_whitelisted: r.get(1)?,
                    is_blacklisted: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

pub fn get_balances(conn: &Connection, address: &str) -> Result<Vec<Balance>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT address, symbol, balance FROM balances WHERE address = ?1 ORDER BY symbol",
    )?;
    let rows = stmt.query_map(params![address], |r| {
        Ok(Balance {
            address: r.get(0)?,
            symbol: r.get(1)?,
            balance: r.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Most recent trades, newest first. Ties on timestamp go to the later insert.
pub fn recent_trades(conn: &Connection, limit: u32) -> Result<Vec<Trade>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, buyer, seller, amount, price, timestamp
         FROM trades
         ORDER BY timestamp DESC, id DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |r| {
        Ok(Trade {
            id: r.get(0)?,
            buyer: r.get(1)?,
            seller: r.get(2)?,
            amount: r.get(3)?,
            price: r.get(4)?,
            timestamp: r.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_prices(conn: &Connection) -> Result<Vec<AssetPrice>, StoreError> {
    let mut stmt = conn.prepare("SELECT symbol, price FROM assets ORDER BY symbol")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;

    let mut prices = Vec::new();
    for row in rows {
        let (symbol, price) = row?;
        let price_eth = format_ether(parse_u256("assets.price", &price)?);
        prices.push(AssetPrice {
            symbol,
            price,
            price_eth,
        });
    }
    Ok(prices)
}

fn nft_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Nft> {
    Ok(Nft {
        token_id: r.get(0)?,
        owner: r.get(1)?,
        uri: r.get(2)?,
        listed: r.get(3)?,
        seller: r.get(4)?,
        price: r.get(5)?,
    })
}

pub fn get_nfts(conn: &Connection) -> Result<Vec<Nft>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT token_id, owner, uri, listed, seller, price FROM nfts
         ORDER BY CAST(token_id AS INTEGER)",
    )?;
    let rows = stmt.query_map([], nft_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_nft(conn: &Connection, token_id: &str) -> Result<Option<Nft>, StoreError> {
    let nft = conn
        .query_row(
            "SELECT token_id, owner, uri, listed, seller, price FROM nfts WHERE token_id = ?1",
            params![token_id],
            nft_from_row,
        )
        .optional()?;
    Ok(nft)
}

/// Shared handle to the projection store.
///
/// One connection behind a mutex; every access runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database and make sure the schema exists.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = connect(path)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let db = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&db)
        })
        .await?
    }
}
