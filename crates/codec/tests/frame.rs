use anyhow::Result;
use bytes::BytesMut;
use ring_node_codec::Frame;

#[test]
fn test_ring_node_codec() -> Result<()> {
    {
        let mut out = BytesMut::new();
        Frame::ValInsert {
            ssn: *b"aaaaabbbbbcc",
            name: b"Ada".to_vec(),
            email: b"a@b".to_vec(),
        }
        .encode(&mut out);

        assert_eq!(out.len(), 21);

        let (frame, consumed) = Frame::decode(&out)?;
        assert_eq!(consumed, out.len());

        let Frame::ValInsert { ssn, name, email } = frame else {
            return Err(anyhow::anyhow!("expected ValInsert"));
        };

        assert_eq!(&ssn, b"aaaaabbbbbcc");
        assert_eq!(name, b"Ada");
        assert_eq!(email, b"a@b");
    }

    {
        // S6: a stray byte that matches no known type resyncs by one byte,
        // after which the next frame decodes cleanly.
        let mut stream = vec![0xFFu8];
        let mut insert = BytesMut::new();
        Frame::ValRemove { ssn: [9; 12] }.encode(&mut insert);
        stream.extend_from_slice(&insert);

        assert!(Frame::required_len(&stream).is_err());

        let (frame, consumed) = Frame::decode(&stream[1..])?;
        assert_eq!(frame, Frame::ValRemove { ssn: [9; 12] });
        assert_eq!(consumed, 13);
    }

    Ok(())
}
