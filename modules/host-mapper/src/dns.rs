//! Minimal DNS wire codec for PTR queries.

use std::net::Ipv4Addr;

use netsweep_core::LookupError;

const HEADER_LEN: usize = 12;
const TYPE_PTR: u16 = 12;
const CLASS_IN: u16 = 1;
const RCODE_NXDOMAIN: u8 = 3;
const MAX_POINTER_JUMPS: usize = 16;

/// `d.c.b.a.in-addr.arpa` for `a.b.c.d`.
pub fn ptr_name(addr: Ipv4Addr) -> String {
    let [a, b, c, d] = addr.octets();
    format!("{}.{}.{}.{}.in-addr.arpa", d, c, b, a)
}

pub(crate) fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

/// Recursive PTR query for `addr` with transaction id `id`.
pub fn build_ptr_query(addr: Ipv4Addr, id: u16) -> Vec<u8> {
    let mut q = Vec::with_capacity(48);
    q.extend_from_slice(&id.to_be_bytes());
    q.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
    q.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    q.extend_from_slice(&encode_name(&ptr_name(addr)));
    q.extend_from_slice(&TYPE_PTR.to_be_bytes());
    q.extend_from_slice(&CLASS_IN.to_be_bytes());
    q
}

pub fn response_id(msg: &[u8]) -> Option<u16> {
    (msg.len() >= 2).then(|| u16::from_be_bytes([msg[0], msg[1]]))
}

/// Every PTR target in the answer section, in wire order.
///
/// NXDOMAIN and an answer section without PTR records are both `NotFound`.
pub fn parse_ptr_response(msg: &[u8], addr: Ipv4Addr) -> Result<Vec<String>, LookupError> {
    if msg.len() < HEADER_LEN {
        return Err(malformed("response shorter than header"));
    }
    if msg[2] & 0x80 == 0 {
        return Err(malformed("QR bit not set"));
    }
    match msg[3] & 0x0F {
        0 => {}
        RCODE_NXDOMAIN => return Err(LookupError::NotFound(addr)),
        rcode => return Err(LookupError::ServerFailure { addr, rcode }),
    }
    let qdcount = read_u16(msg, 4)?;
    let ancount = read_u16(msg, 6)?;

    let mut pos = HEADER_LEN;
    for _ in 0..qdcount {
        let (_, next) = read_name(msg, pos)?;
        pos = next + 4;
    }

    let mut names = Vec::new();
    for _ in 0..ancount {
        let (_, next) = read_name(msg, pos)?;
        let rtype = read_u16(msg, next)?;
        let rdlen = read_u16(msg, next + 8)? as usize;
        let rdata = next + 10;
        if rdata + rdlen > msg.len() {
            return Err(malformed("answer runs past end of message"));
        }
        if rtype == TYPE_PTR {
            let (name, _) = read_name(msg, rdata)?;
            names.push(name);
        }
        pos = rdata + rdlen;
    }
    if names.is_empty() {
        return Err(LookupError::NotFound(addr));
    }
    Ok(names)
}

fn malformed(what: &str) -> LookupError {
    LookupError::Malformed(what.to_string())
}

fn read_u16(msg: &[u8], at: usize) -> Result<u16, LookupError> {
    msg.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| malformed("truncated field"))
}

/// Decode a possibly-compressed name at `start`. Returns the dotted name and the
/// offset just past it in the original position.
fn read_name(msg: &[u8], start: usize) -> Result<(String, usize), LookupError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut end = None;
    let mut jumps = 0;
    loop {
        let len = *msg.get(pos).ok_or_else(|| malformed("name runs past end"))? as usize;
        match len & 0xC0 {
            0xC0 => {
                let lo = *msg.get(pos + 1).ok_or_else(|| malformed("truncated pointer"))? as usize;
                end.get_or_insert(pos + 2);
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(malformed("compression loop"));
                }
                pos = ((len & 0x3F) << 8) | lo;
            }
            0x00 if len == 0 => {
                let next = end.unwrap_or(pos + 1);
                return Ok((labels.join("."), next));
            }
            0x00 => {
                let label = msg
                    .get(pos + 1..pos + 1 + len)
                    .ok_or_else(|| malformed("label runs past end"))?;
                labels.push(String::from_utf8_lossy(label).into_owned());
                pos += 1 + len;
            }
            _ => return Err(malformed("unsupported label type")),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Answer `query` with the given PTR targets (or the given rcode when `names` is empty).
    pub(crate) fn respond(query: &[u8], names: &[&str], rcode: u8) -> Vec<u8> {
        let mut r = Vec::new();
        r.extend_from_slice(&query[0..2]);
        r.extend_from_slice(&(0x8180u16 | rcode as u16).to_be_bytes());
        r.extend_from_slice(&1u16.to_be_bytes());
        r.extend_from_slice(&(names.len() as u16).to_be_bytes());
        r.extend_from_slice(&0u16.to_be_bytes());
        r.extend_from_slice(&0u16.to_be_bytes());
        r.extend_from_slice(&query[HEADER_LEN..]);
        for name in names {
            r.extend_from_slice(&[0xC0, 0x0C]); // owner: pointer to the question name
            r.extend_from_slice(&TYPE_PTR.to_be_bytes());
            r.extend_from_slice(&CLASS_IN.to_be_bytes());
            r.extend_from_slice(&300u32.to_be_bytes());
            let rdata = encode_name(name);
            r.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            r.extend_from_slice(&rdata);
        }
        r
    }

    #[test]
    fn ptr_name_reverses_octets() {
        assert_eq!(ptr_name(Ipv4Addr::new(192, 168, 1, 5)), "5.1.168.192.in-addr.arpa");
    }

    #[test]
    fn query_layout() {
        let q = build_ptr_query(Ipv4Addr::new(10, 0, 0, 9), 0xBEEF);
        assert_eq!(&q[0..2], &[0xBE, 0xEF]);
        assert_eq!(&q[2..4], &[0x01, 0x00]);
        assert_eq!(&q[4..6], &[0x00, 0x01]);
        let (name, next) = read_name(&q, HEADER_LEN).unwrap();
        assert_eq!(name, "9.0.0.10.in-addr.arpa");
        assert_eq!(&q[next..], &[0x00, 0x0C, 0x00, 0x01]);
    }

    #[test]
    fn parses_answers_with_compressed_owner() {
        let addr = Ipv4Addr::new(192, 168, 1, 5);
        let q = build_ptr_query(addr, 7);
        let r = respond(&q, &["printer.lan", "printer-alt.lan"], 0);
        assert_eq!(response_id(&r), Some(7));
        let names = parse_ptr_response(&r, addr).unwrap();
        assert_eq!(names, vec!["printer.lan".to_string(), "printer-alt.lan".to_string()]);
    }

    #[test]
    fn compressed_rdata_pointing_into_question() {
        // rdata that is only a pointer resolves to the question name itself
        let addr = Ipv4Addr::new(10, 1, 2, 3);
        let q = build_ptr_query(addr, 1);
        let mut r = respond(&q, &[], 0);
        r[7] = 1; // ANCOUNT
        r.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x0C, 0x00, 0x01, 0, 0, 0, 60, 0x00, 0x02, 0xC0, 0x0C]);
        let names = parse_ptr_response(&r, addr).unwrap();
        assert_eq!(names, vec!["3.2.1.10.in-addr.arpa".to_string()]);
    }

    #[test]
    fn nxdomain_is_not_found() {
        let addr = Ipv4Addr::new(192, 168, 1, 100);
        let r = respond(&build_ptr_query(addr, 2), &[], RCODE_NXDOMAIN);
        assert!(matches!(parse_ptr_response(&r, addr), Err(LookupError::NotFound(a)) if a == addr));
    }

    #[test]
    fn servfail_and_empty_answers() {
        let addr = Ipv4Addr::new(192, 168, 1, 100);
        let q = build_ptr_query(addr, 3);
        assert!(matches!(
            parse_ptr_response(&respond(&q, &[], 2), addr),
            Err(LookupError::ServerFailure { rcode: 2, .. })
        ));
        assert!(matches!(parse_ptr_response(&respond(&q, &[], 0), addr), Err(LookupError::NotFound(_))));
    }

    #[test]
    fn truncated_and_looping_messages_are_malformed() {
        let addr = Ipv4Addr::new(192, 168, 1, 5);
        let q = build_ptr_query(addr, 4);
        let r = respond(&q, &["printer.lan"], 0);
        assert!(matches!(parse_ptr_response(&r[..r.len() - 3], addr), Err(LookupError::Malformed(_))));

        let mut looped = respond(&q, &[], 0);
        looped[5] = 0; // QDCOUNT = 0
        looped[7] = 1; // ANCOUNT = 1
        looped.truncate(HEADER_LEN);
        looped.extend_from_slice(&[0xC0, HEADER_LEN as u8]);
        assert!(matches!(parse_ptr_response(&looped, addr), Err(LookupError::Malformed(_))));
    }
}
