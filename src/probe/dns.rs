//! Minimal DNS client: type-A queries with recursion desired, sent straight
//! to a chosen server over UDP, retried over TCP when the reply is truncated.

use crate::error::{PortalError, Result};
use crate::report::Reporter;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use lazy_static::lazy_static;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;

pub const DEFAULT_DNS_PORT: u16 = 53;

const HEADER_LEN: usize = 12;
const FLAG_QR: u16 = 0x8000;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const RCODE_MASK: u16 = 0x000f;
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;
const MAX_UDP_REPLY: usize = 4096;

lazy_static! {
    static ref EXPLICIT_PORT: Regex = Regex::new(r":\d{1,5}$").unwrap();
}

/// Outcome of one query that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub rcode: u8,
    pub answer_count: u16,
    pub a_records: Vec<Ipv4Addr>,
}

/// Split a server spec into host and port, defaulting to port 53.
///
/// Bare IPv6 literals are accepted; bracketed `[v6]:port` too.
pub fn server_endpoint(server: &str) -> (String, u16) {
    let server = server.trim();
    if let Ok(ip) = server.parse::<IpAddr>() {
        return (ip.to_string(), DEFAULT_DNS_PORT);
    }
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return (addr.ip().to_string(), addr.port());
    }
    if EXPLICIT_PORT.is_match(server) {
        if let Some((host, port)) = server.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                return (host.trim_matches(['[', ']']).to_string(), port);
            }
        }
    }
    (server.to_string(), DEFAULT_DNS_PORT)
}

/// Encode a standard query for `domain` type A, recursion desired.
pub fn encode_query(id: u16, domain: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + domain.len() + 6);
    buf.put_u16(id);
    buf.put_u16(FLAG_RD);
    buf.put_u16(1); // QDCOUNT
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_u16(0);

    for label in domain.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(PortalError::Parse(format!("invalid domain name [{domain}]")));
        }
        buf.put_u8(label.len() as u8);
        buf.put_slice(label.as_bytes());
    }
    buf.put_u8(0);
    buf.put_u16(TYPE_A);
    buf.put_u16(CLASS_IN);
    Ok(buf.freeze())
}

fn truncated(what: &str) -> PortalError {
    PortalError::Protocol(format!("truncated DNS message while reading {what}"))
}

/// Skip a possibly compressed name starting at the cursor.
fn skip_name(buf: &mut &[u8]) -> Result<()> {
    loop {
        if !buf.has_remaining() {
            return Err(truncated("name"));
        }
        let len = buf.get_u8();
        match len & 0xc0 {
            0x00 if len == 0 => return Ok(()),
            0x00 => {
                if buf.remaining() < len as usize {
                    return Err(truncated("label"));
                }
                buf.advance(len as usize);
            }
            0xc0 => {
                // A pointer ends the name.
                if !buf.has_remaining() {
                    return Err(truncated("pointer"));
                }
                buf.advance(1);
                return Ok(());
            }
            _ => return Err(PortalError::Protocol("unsupported label type".to_string())),
        }
    }
}

/// Decode a reply to the query with `id`.
pub fn decode_response(id: u16, message: &[u8]) -> Result<DnsAnswer> {
    let mut buf = message;
    if buf.remaining() < HEADER_LEN {
        return Err(truncated("header"));
    }
    let reply_id = buf.get_u16();
    let flags = buf.get_u16();
    let question_count = buf.get_u16();
    let answer_count = buf.get_u16();
    buf.advance(4);

    if reply_id != id {
        return Err(PortalError::Protocol(format!(
            "DNS reply id {reply_id} does not match query id {id}"
        )));
    }
    if flags & FLAG_QR == 0 {
        return Err(PortalError::Protocol("DNS message is not a reply".to_string()));
    }

    for _ in 0..question_count {
        skip_name(&mut buf)?;
        if buf.remaining() < 4 {
            return Err(truncated("question"));
        }
        buf.advance(4);
    }

    let mut a_records = Vec::new();
    for _ in 0..answer_count {
        skip_name(&mut buf)?;
        if buf.remaining() < 10 {
            return Err(truncated("record header"));
        }
        let record_type = buf.get_u16();
        let class = buf.get_u16();
        buf.advance(4); // TTL
        let rdlength = buf.get_u16() as usize;
        if buf.remaining() < rdlength {
            return Err(truncated("record data"));
        }
        if record_type == TYPE_A && class == CLASS_IN && rdlength == 4 {
            a_records.push(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
        }
        buf.advance(rdlength);
    }

    Ok(DnsAnswer {
        rcode: (flags & RCODE_MASK) as u8,
        answer_count,
        a_records,
    })
}

fn is_truncated(message: &[u8]) -> bool {
    message.len() >= 4 && u16::from_be_bytes([message[2], message[3]]) & FLAG_TC != 0
}

async fn resolve_server(server: &str) -> Result<SocketAddr> {
    let (host, port) = server_endpoint(server);
    let mut addrs = lookup_host((host.as_str(), port)).await?;
    addrs
        .next()
        .ok_or_else(|| PortalError::NotFound(format!("no address for DNS server [{server}]")))
}

/// Send one type-A query for `domain` to `server` and decode the reply.
///
/// Resolving the server name, the UDP round trip and the TCP retry each get
/// `timeout_after`.
pub async fn exchange(
    server: &str,
    domain: &str,
    timeout_after: Duration,
    reporter: &dyn Reporter,
) -> Result<DnsAnswer> {
    let addr = timeout(timeout_after, resolve_server(server))
        .await
        .map_err(|_| PortalError::Timeout(format!("resolving DNS server [{server}]")))??;
    let id = fastrand::u16(..);
    let query = encode_query(id, domain)?;
    reporter.debug(&format!("Send type A query for [{domain}] to DNS server {addr}"));

    let reply = timeout(timeout_after, udp_round_trip(addr, &query))
        .await
        .map_err(|_| PortalError::Timeout(format!("DNS query to {addr}")))??;

    if !is_truncated(&reply) {
        return decode_response(id, &reply);
    }

    reporter.debug(&format!("Truncated UDP reply from {addr}, retrying over TCP"));
    let reply = timeout(timeout_after, tcp_round_trip(addr, &query))
        .await
        .map_err(|_| PortalError::Timeout(format!("DNS query to {addr} over TCP")))??;
    decode_response(id, &reply)
}

async fn udp_round_trip(addr: SocketAddr, query: &[u8]) -> Result<Vec<u8>> {
    let bind: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;
    socket.send(query).await?;

    let mut reply = vec![0u8; MAX_UDP_REPLY];
    let len = socket.recv(&mut reply).await?;
    reply.truncate(len);
    Ok(reply)
}

async fn tcp_round_trip(addr: SocketAddr, query: &[u8]) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    let mut framed = BytesMut::with_capacity(query.len() + 2);
    framed.put_u16(query.len() as u16);
    framed.put_slice(query);
    stream.write_all(&framed).await?;

    let len = stream.read_u16().await? as usize;
    let mut reply = vec![0u8; len];
    stream.read_exact(&mut reply).await?;
    Ok(reply)
}

/// Query `domain` at `server` and require a successful reply with A records.
pub async fn check(
    server: &str,
    domain: &str,
    timeout_after: Duration,
    reporter: &dyn Reporter,
) -> Result<Vec<Ipv4Addr>> {
    let answer = exchange(server, domain, timeout_after, reporter).await?;
    if answer.rcode != 0 {
        return Err(PortalError::Protocol(format!(
            "Response from {server} with error {}",
            answer.rcode
        )));
    }
    if answer.answer_count == 0 {
        return Err(PortalError::NotFound(format!("empty answer from {server}")));
    }
    if answer.a_records.is_empty() {
        return Err(PortalError::NotFound(format!(
            "cannot get any DNS A record from {server}"
        )));
    }
    reporter.debug(&format!(
        "Query result from server [{server}]: {}",
        answer
            .a_records
            .iter()
            .map(|ip| ip.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    Ok(answer.a_records)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Build a reply to `query` answering with `records` and `rcode`.
    pub fn build_reply(query: &[u8], rcode: u8, records: &[Ipv4Addr]) -> Vec<u8> {
        let mut question = &query[HEADER_LEN..];
        let start = question;
        skip_name(&mut question).unwrap();
        question.advance(4);
        let question_len = start.len() - question.len();

        let mut buf = BytesMut::new();
        buf.put_slice(&query[0..2]);
        buf.put_u16(FLAG_QR | FLAG_RD | 0x0080 | u16::from(rcode));
        buf.put_u16(1);
        buf.put_u16(records.len() as u16);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_slice(&query[HEADER_LEN..HEADER_LEN + question_len]);
        for ip in records {
            buf.put_u16(0xc00c); // pointer to the question name
            buf.put_u16(TYPE_A);
            buf.put_u16(CLASS_IN);
            buf.put_u32(60);
            buf.put_u16(4);
            buf.put_slice(&ip.octets());
        }
        buf.to_vec()
    }

    /// Domain name of a query, dotted.
    pub fn query_domain(query: &[u8]) -> String {
        let mut labels = Vec::new();
        let mut pos = HEADER_LEN;
        while pos < query.len() && query[pos] != 0 {
            let len = query[pos] as usize;
            labels.push(String::from_utf8_lossy(&query[pos + 1..pos + 1 + len]).into_owned());
            pos += len + 1;
        }
        labels.join(".")
    }

    /// UDP server answering domains present in `zone`; others get NXDOMAIN.
    pub async fn mock_dns_server(zone: HashMap<String, Vec<Ipv4Addr>>) -> SocketAddr {
        slow_dns_server(zone, Duration::ZERO).await
    }

    /// Like [`mock_dns_server`], holding every reply back for `delay`.
    pub async fn slow_dns_server(zone: HashMap<String, Vec<Ipv4Addr>>, delay: Duration) -> SocketAddr {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let query = &buf[..len];
                let reply = match zone.get(&query_domain(query)) {
                    Some(records) => build_reply(query, 0, records),
                    None => build_reply(query, 3, &[]),
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        addr
    }
}
