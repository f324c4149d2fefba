use crate::dns::name;
use crate::dns::types::{RecordType, ResponseCode, CLASS_IN};

/// Raw DNS packet codec - just enough of RFC 1035 to ask for a CNAME and
/// read the answer back. Everything is hand-parsed from &[u8].

#[derive(Debug, Clone)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool, // Query/Response flag
    pub tc: bool, // Truncated
    pub rcode: ResponseCode,
    pub qdcount: u16,
    pub ancount: u16,
}

#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: RecordType,
}

#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: RecordType,
    /// Offset of the rdata inside the packet, needed to follow compression
    /// pointers in name-valued rdata.
    pub rdata_offset: usize,
}

#[derive(Debug, Clone)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub raw: Vec<u8>,
}

/// Parse a DNS name from raw bytes with label compression support (RFC 1035 §4.1.4)
pub fn parse_name(data: &[u8], offset: &mut usize) -> anyhow::Result<String> {
    let mut labels = Vec::new();
    let mut jumped = false;
    let mut pos = *offset;
    let mut jumps_performed = 0;
    const MAX_JUMPS: usize = 10; // Prevent infinite loops

    loop {
        if pos >= data.len() {
            return Err(anyhow::anyhow!("DNS name parse: unexpected end of data at offset {}", pos));
        }

        let len_byte = data[pos];

        // Compression pointer - top 2 bits are 11
        if (len_byte & 0xC0) == 0xC0 {
            if pos + 1 >= data.len() {
                return Err(anyhow::anyhow!("DNS name parse: truncated pointer at offset {}", pos));
            }
            if !jumped {
                *offset = pos + 2;
                jumped = true;
            }
            let pointer = ((len_byte as u16 & 0x3F) << 8) | data[pos + 1] as u16;
            pos = pointer as usize;
            jumps_performed += 1;
            if jumps_performed > MAX_JUMPS {
                return Err(anyhow::anyhow!("DNS name parse: too many jumps (possible loop)"));
            }
            continue;
        }

        if len_byte == 0 {
            if !jumped {
                *offset = pos + 1;
            }
            break;
        }

        let label_len = len_byte as usize;
        pos += 1;

        if pos + label_len > data.len() {
            return Err(anyhow::anyhow!("DNS name parse: label extends beyond packet"));
        }

        labels.push(String::from_utf8_lossy(&data[pos..pos + label_len]).to_string());
        pos += label_len;
    }

    Ok(labels.join("."))
}

/// Parse a response packet: header, question section and answer section.
/// Authority and additional sections are never needed for CNAME discovery.
pub fn parse_packet(data: &[u8]) -> anyhow::Result<DnsPacket> {
    if data.len() < 12 {
        return Err(anyhow::anyhow!("DNS packet too short: {} bytes (minimum 12)", data.len()));
    }

    let flags = u16::from_be_bytes([data[2], data[3]]);
    let header = DnsHeader {
        id: u16::from_be_bytes([data[0], data[1]]),
        qr: (flags >> 15) & 1 == 1,
        tc: (flags >> 9) & 1 == 1,
        rcode: ResponseCode::from((flags & 0xF) as u8),
        qdcount: u16::from_be_bytes([data[4], data[5]]),
        ancount: u16::from_be_bytes([data[6], data[7]]),
    };

    let mut offset = 12;

    let mut questions = Vec::new();
    for _ in 0..header.qdcount {
        let name = parse_name(data, &mut offset)?;
        if offset + 4 > data.len() {
            return Err(anyhow::anyhow!("DNS question section truncated"));
        }
        let qtype = RecordType::from(u16::from_be_bytes([data[offset], data[offset + 1]]));
        offset += 4;
        questions.push(DnsQuestion { name, qtype });
    }

    let answers = parse_records(data, &mut offset, header.ancount)?;

    Ok(DnsPacket {
        header,
        questions,
        answers,
        raw: data.to_vec(),
    })
}

fn parse_records(data: &[u8], offset: &mut usize, count: u16) -> anyhow::Result<Vec<DnsRecord>> {
    let mut records = Vec::new();
    for _ in 0..count {
        let name = parse_name(data, offset)?;
        if *offset + 10 > data.len() {
            return Err(anyhow::anyhow!("DNS record truncated at offset {}", offset));
        }
        let rtype = RecordType::from(u16::from_be_bytes([data[*offset], data[*offset + 1]]));
        let rdlength = u16::from_be_bytes([data[*offset + 8], data[*offset + 9]]);
        *offset += 10;

        if *offset + rdlength as usize > data.len() {
            return Err(anyhow::anyhow!("DNS rdata extends beyond packet"));
        }
        let rdata_offset = *offset;
        *offset += rdlength as usize;

        records.push(DnsRecord {
            name,
            rtype,
            rdata_offset,
        });
    }
    Ok(records)
}

/// Encode a DNS name into wire format
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut result = Vec::new();
    let name = name.trim_end_matches('.');
    if name.is_empty() {
        result.push(0);
        return result;
    }
    for label in name.split('.') {
        result.push(label.len() as u8);
        result.extend_from_slice(label.as_bytes());
    }
    result.push(0);
    result
}

/// Build a recursive query packet for a single question
pub fn build_query(id: u16, name: &str, qtype: RecordType) -> anyhow::Result<Vec<u8>> {
    let name = name.trim_end_matches('.');
    if name.len() > 253 {
        return Err(anyhow::anyhow!("DNS name too long: {} bytes", name.len()));
    }
    if name.is_empty() || name.split('.').any(|l| l.is_empty()) {
        return Err(anyhow::anyhow!("DNS name '{}' has an empty label", name));
    }
    if let Some(label) = name.split('.').find(|l| l.len() > 63) {
        return Err(anyhow::anyhow!("DNS label too long: '{}'", label));
    }

    let mut packet = Vec::with_capacity(512);

    // Header
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&0x0100u16.to_be_bytes()); // RD=1
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT=1
    packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT=0
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT=0
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT=0

    // Question
    packet.extend_from_slice(&encode_name(name));
    packet.extend_from_slice(&qtype.to_u16().to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());

    Ok(packet)
}

/// CNAME targets owned by `qname` in the answer section, in wire order.
///
/// Targets come back in canonical form. Records owned by other names (a
/// resolver may append the rest of the chain) are ignored; the walker asks
/// for those itself.
pub fn cname_targets(packet: &DnsPacket, qname: &str) -> anyhow::Result<Vec<String>> {
    let owner = name::normalize(qname);
    let mut targets = Vec::new();
    for record in &packet.answers {
        if record.rtype != RecordType::CNAME || name::normalize(&record.name) != owner {
            continue;
        }
        let mut pos = record.rdata_offset;
        let target = name::normalize(&parse_name(&packet.raw, &mut pos)?);
        if !target.is_empty() {
            targets.push(target);
        }
    }
    Ok(targets)
}
