use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use super::Error;

const TYPE_STUN_LOOKUP: u8 = 1;
const TYPE_STUN_RESPONSE: u8 = 2;
const TYPE_NET_ALIVE: u8 = 3;
const TYPE_NET_GET_NODE: u8 = 4;
const TYPE_NET_GET_NODE_RESPONSE: u8 = 5;
const TYPE_NET_JOIN: u8 = 6;
const TYPE_NET_JOIN_RESPONSE: u8 = 7;
const TYPE_NET_LEAVING: u8 = 8;
const TYPE_NET_NEW_RANGE: u8 = 9;
const TYPE_NET_NEW_RANGE_RESPONSE: u8 = 10;
const TYPE_NET_CLOSE_CONNECTION: u8 = 11;
const TYPE_VAL_INSERT: u8 = 12;
const TYPE_VAL_REMOVE: u8 = 13;
const TYPE_VAL_LOOKUP: u8 = 14;
const TYPE_VAL_LOOKUP_RESPONSE: u8 = 15;

/// A decoded wire frame.
///
/// One sum type stands in for per-type structs plus an explicit type byte:
/// the discriminant is implicit in the Rust variant, so there is no
/// separate "PDU type" tag to keep in sync with the payload shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    StunLookup,
    StunResponse {
        address: Ipv4Addr,
    },
    NetAlive,
    NetGetNode,
    NetGetNodeResponse {
        address: Ipv4Addr,
        port: u16,
    },
    NetJoin {
        src_addr: Ipv4Addr,
        src_port: u16,
        max_span: u8,
        max_addr: Ipv4Addr,
        max_port: u16,
    },
    NetJoinResponse {
        next_addr: Ipv4Addr,
        next_port: u16,
        range_start: u8,
        range_end: u8,
    },
    NetLeaving {
        new_addr: Ipv4Addr,
        new_port: u16,
    },
    NetNewRange {
        range_start: u8,
        range_end: u8,
    },
    NetNewRangeResponse,
    NetCloseConnection,
    ValInsert {
        ssn: [u8; 12],
        name: Vec<u8>,
        email: Vec<u8>,
    },
    ValRemove {
        ssn: [u8; 12],
    },
    ValLookup {
        ssn: [u8; 12],
        sender_addr: Ipv4Addr,
        sender_port: u16,
    },
    ValLookupResponse {
        ssn: [u8; 12],
        name: Vec<u8>,
        email: Vec<u8>,
    },
}

fn addr_at(bytes: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::from(u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()))
}

fn port_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

impl Frame {
    /// Returns the full length of the frame (including the 1-byte type)
    /// once it is determinable from the bytes buffered so far, or `None`
    /// if more bytes are needed before even that much is known.
    ///
    /// # Test
    ///
    /// ```
    /// use ring_node_codec::Frame;
    ///
    /// assert_eq!(Frame::required_len(&[]).unwrap(), None);
    /// assert_eq!(Frame::required_len(&[3]).unwrap(), Some(1));
    /// ```
    pub fn required_len(bytes: &[u8]) -> Result<Option<usize>, Error> {
        let Some(&ty) = bytes.first() else {
            return Ok(None);
        };

        let fixed = match ty {
            TYPE_STUN_LOOKUP
            | TYPE_NET_ALIVE
            | TYPE_NET_GET_NODE
            | TYPE_NET_NEW_RANGE_RESPONSE
            | TYPE_NET_CLOSE_CONNECTION => 1,
            TYPE_STUN_RESPONSE => 5,
            TYPE_NET_GET_NODE_RESPONSE => 7,
            TYPE_NET_JOIN => 14,
            TYPE_NET_JOIN_RESPONSE => 9,
            TYPE_NET_LEAVING => 7,
            TYPE_NET_NEW_RANGE => 3,
            TYPE_VAL_REMOVE => 13,
            TYPE_VAL_LOOKUP => 19,
            TYPE_VAL_INSERT | TYPE_VAL_LOOKUP_RESPONSE => {
                // 1 (type) + 12 (ssn) + 1 (name length byte)
                const NAME_LEN_OFFSET: usize = 13;
                if bytes.len() <= NAME_LEN_OFFSET {
                    return Ok(None);
                }

                let name_len = bytes[NAME_LEN_OFFSET] as usize;
                let email_len_offset = NAME_LEN_OFFSET + 1 + name_len;
                if bytes.len() <= email_len_offset {
                    return Ok(None);
                }

                let email_len = bytes[email_len_offset] as usize;
                return Ok(Some(email_len_offset + 1 + email_len));
            }
            other => return Err(Error::UnknownType(other)),
        };

        Ok(Some(fixed))
    }

    /// Decodes one frame from the front of `bytes`, returning it along with
    /// the number of bytes it occupied. The caller must have already
    /// established `bytes.len() >= required_len(bytes)` — this function is
    /// total given that precondition.
    ///
    /// # Test
    ///
    /// ```
    /// use ring_node_codec::Frame;
    /// use bytes::BytesMut;
    ///
    /// let mut out = BytesMut::new();
    /// Frame::NetAlive.encode(&mut out);
    ///
    /// let (frame, consumed) = Frame::decode(&out).unwrap();
    /// assert_eq!(frame, Frame::NetAlive);
    /// assert_eq!(consumed, 1);
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<(Frame, usize), Error> {
        let len = match Self::required_len(bytes)? {
            Some(len) if bytes.len() >= len => len,
            _ => return Err(Error::Short),
        };

        let body = &bytes[1..len];
        let frame = match bytes[0] {
            TYPE_STUN_LOOKUP => Frame::StunLookup,
            TYPE_STUN_RESPONSE => Frame::StunResponse {
                address: addr_at(body, 0),
            },
            TYPE_NET_ALIVE => Frame::NetAlive,
            TYPE_NET_GET_NODE => Frame::NetGetNode,
            TYPE_NET_GET_NODE_RESPONSE => Frame::NetGetNodeResponse {
                address: addr_at(body, 0),
                port: port_at(body, 4),
            },
            TYPE_NET_JOIN => Frame::NetJoin {
                src_addr: addr_at(body, 0),
                src_port: port_at(body, 4),
                max_span: body[6],
                max_addr: addr_at(body, 7),
                max_port: port_at(body, 11),
            },
            TYPE_NET_JOIN_RESPONSE => Frame::NetJoinResponse {
                next_addr: addr_at(body, 0),
                next_port: port_at(body, 4),
                range_start: body[6],
                range_end: body[7],
            },
            TYPE_NET_LEAVING => Frame::NetLeaving {
                new_addr: addr_at(body, 0),
                new_port: port_at(body, 4),
            },
            TYPE_NET_NEW_RANGE => Frame::NetNewRange {
                range_start: body[0],
                range_end: body[1],
            },
            TYPE_NET_NEW_RANGE_RESPONSE => Frame::NetNewRangeResponse,
            TYPE_NET_CLOSE_CONNECTION => Frame::NetCloseConnection,
            TYPE_VAL_REMOVE => Frame::ValRemove {
                ssn: body[0..12].try_into().unwrap(),
            },
            TYPE_VAL_LOOKUP => Frame::ValLookup {
                ssn: body[0..12].try_into().unwrap(),
                sender_addr: addr_at(body, 12),
                sender_port: port_at(body, 16),
            },
            TYPE_VAL_INSERT | TYPE_VAL_LOOKUP_RESPONSE => {
                let ssn: [u8; 12] = body[0..12].try_into().unwrap();
                let name_len = body[12] as usize;
                let name = body[13..13 + name_len].to_vec();
                let email_len_offset = 13 + name_len;
                let email_len = body[email_len_offset] as usize;
                let email =
                    body[email_len_offset + 1..email_len_offset + 1 + email_len].to_vec();

                if bytes[0] == TYPE_VAL_INSERT {
                    Frame::ValInsert { ssn, name, email }
                } else {
                    Frame::ValLookupResponse { ssn, name, email }
                }
            }
            other => return Err(Error::UnknownType(other)),
        };

        Ok((frame, len))
    }

    /// Appends the serialized frame to `out`.
    ///
    /// # Test
    ///
    /// ```
    /// use ring_node_codec::Frame;
    /// use bytes::BytesMut;
    /// use std::net::Ipv4Addr;
    ///
    /// let mut out = BytesMut::new();
    /// Frame::NetNewRange { range_start: 0, range_end: 127 }.encode(&mut out);
    /// assert_eq!(&out[..], &[9, 0, 127]);
    /// ```
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Frame::StunLookup => out.put_u8(TYPE_STUN_LOOKUP),
            Frame::StunResponse { address } => {
                out.put_u8(TYPE_STUN_RESPONSE);
                out.put_u32_le(u32::from(*address));
            }
            Frame::NetAlive => out.put_u8(TYPE_NET_ALIVE),
            Frame::NetGetNode => out.put_u8(TYPE_NET_GET_NODE),
            Frame::NetGetNodeResponse { address, port } => {
                out.put_u8(TYPE_NET_GET_NODE_RESPONSE);
                out.put_u32_le(u32::from(*address));
                out.put_u16_le(*port);
            }
            Frame::NetJoin {
                src_addr,
                src_port,
                max_span,
                max_addr,
                max_port,
            } => {
                out.put_u8(TYPE_NET_JOIN);
                out.put_u32_le(u32::from(*src_addr));
                out.put_u16_le(*src_port);
                out.put_u8(*max_span);
                out.put_u32_le(u32::from(*max_addr));
                out.put_u16_le(*max_port);
            }
            Frame::NetJoinResponse {
                next_addr,
                next_port,
                range_start,
                range_end,
            } => {
                out.put_u8(TYPE_NET_JOIN_RESPONSE);
                out.put_u32_le(u32::from(*next_addr));
                out.put_u16_le(*next_port);
                out.put_u8(*range_start);
                out.put_u8(*range_end);
            }
            Frame::NetLeaving { new_addr, new_port } => {
                out.put_u8(TYPE_NET_LEAVING);
                out.put_u32_le(u32::from(*new_addr));
                out.put_u16_le(*new_port);
            }
            Frame::NetNewRange {
                range_start,
                range_end,
            } => {
                out.put_u8(TYPE_NET_NEW_RANGE);
                out.put_u8(*range_start);
                out.put_u8(*range_end);
            }
            Frame::NetNewRangeResponse => out.put_u8(TYPE_NET_NEW_RANGE_RESPONSE),
            Frame::NetCloseConnection => out.put_u8(TYPE_NET_CLOSE_CONNECTION),
            Frame::ValInsert { ssn, name, email } => {
                out.put_u8(TYPE_VAL_INSERT);
                encode_val_body(out, ssn, name, email);
            }
            Frame::ValRemove { ssn } => {
                out.put_u8(TYPE_VAL_REMOVE);
                out.extend_from_slice(ssn);
            }
            Frame::ValLookup {
                ssn,
                sender_addr,
                sender_port,
            } => {
                out.put_u8(TYPE_VAL_LOOKUP);
                out.extend_from_slice(ssn);
                out.put_u32_le(u32::from(*sender_addr));
                out.put_u16_le(*sender_port);
            }
            Frame::ValLookupResponse { ssn, name, email } => {
                out.put_u8(TYPE_VAL_LOOKUP_RESPONSE);
                encode_val_body(out, ssn, name, email);
            }
        }
    }
}

fn encode_val_body(out: &mut BytesMut, ssn: &[u8; 12], name: &[u8], email: &[u8]) {
    out.extend_from_slice(ssn);
    out.put_u8(name.len() as u8);
    out.extend_from_slice(name);
    out.put_u8(email.len() as u8);
    out.extend_from_slice(email);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let mut out = BytesMut::new();
        frame.encode(&mut out);
        let (decoded, consumed) = Frame::decode(&out).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(consumed, out.len());
    }

    #[test]
    fn every_fixed_frame_roundtrips() {
        roundtrip(Frame::StunLookup);
        roundtrip(Frame::StunResponse {
            address: Ipv4Addr::new(10, 0, 0, 1),
        });
        roundtrip(Frame::NetAlive);
        roundtrip(Frame::NetGetNode);
        roundtrip(Frame::NetGetNodeResponse {
            address: Ipv4Addr::new(10, 0, 0, 2),
            port: 9000,
        });
        roundtrip(Frame::NetJoin {
            src_addr: Ipv4Addr::new(127, 0, 0, 1),
            src_port: 4000,
            max_span: 12,
            max_addr: Ipv4Addr::new(127, 0, 0, 2),
            max_port: 4001,
        });
        roundtrip(Frame::NetJoinResponse {
            next_addr: Ipv4Addr::new(127, 0, 0, 3),
            next_port: 4002,
            range_start: 128,
            range_end: 255,
        });
        roundtrip(Frame::NetLeaving {
            new_addr: Ipv4Addr::new(127, 0, 0, 4),
            new_port: 4003,
        });
        roundtrip(Frame::NetNewRange {
            range_start: 0,
            range_end: 127,
        });
        roundtrip(Frame::NetNewRangeResponse);
        roundtrip(Frame::NetCloseConnection);
        roundtrip(Frame::ValRemove { ssn: [1; 12] });
        roundtrip(Frame::ValLookup {
            ssn: [2; 12],
            sender_addr: Ipv4Addr::new(127, 0, 0, 5),
            sender_port: 4004,
        });
    }

    #[test]
    fn val_insert_with_variable_fields_roundtrips() {
        roundtrip(Frame::ValInsert {
            ssn: *b"aaaaabbbbbcc",
            name: b"Ada".to_vec(),
            email: b"a@b".to_vec(),
        });
        roundtrip(Frame::ValLookupResponse {
            ssn: *b"aaaaabbbbbcc",
            name: Vec::new(),
            email: Vec::new(),
        });
    }

    #[test]
    fn val_insert_matches_the_documented_byte_layout() {
        let mut out = BytesMut::new();
        Frame::ValInsert {
            ssn: *b"aaaaabbbbbcc",
            name: b"Ada".to_vec(),
            email: b"a@b".to_vec(),
        }
        .encode(&mut out);

        assert_eq!(out.len(), 21);
        let mut expected = vec![TYPE_VAL_INSERT];
        expected.extend_from_slice(b"aaaaabbbbbcc");
        expected.push(3);
        expected.extend_from_slice(b"Ada");
        expected.push(3);
        expected.extend_from_slice(b"a@b");
        assert_eq!(&out[..], &expected[..]);
    }

    #[test]
    fn unknown_type_resyncs_by_one_byte() {
        let mut stream = vec![0xFF];
        stream.push(TYPE_VAL_REMOVE);
        stream.extend_from_slice(&[7; 12]);

        assert_eq!(Frame::required_len(&stream), Err(Error::UnknownType(0xFF)));

        let (frame, consumed) = Frame::decode(&stream[1..]).unwrap();
        assert_eq!(frame, Frame::ValRemove { ssn: [7; 12] });
        assert_eq!(consumed, 13);
    }

    #[test]
    fn short_buffer_never_partially_decodes() {
        assert_eq!(Frame::required_len(&[]), Ok(None));
        assert_eq!(Frame::required_len(&[TYPE_NET_JOIN]), Ok(Some(14)));
        assert_eq!(Frame::decode(&[TYPE_NET_JOIN]), Err(Error::Short));

        let partial = [TYPE_VAL_INSERT, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 3];
        assert_eq!(Frame::required_len(&partial), Ok(None));
    }
}
