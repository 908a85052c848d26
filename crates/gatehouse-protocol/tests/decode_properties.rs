use gatehouse_core::CredentialId;
use gatehouse_protocol::{AuthReply, WireMessage};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_decode_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = AuthReply::decode(&payload);
    }

    #[test]
    fn test_reply_for_any_valid_credential(id in "[0-9a-fA-F]{1,32}", authorized in any::<bool>()) {
        let payload = format!(r#"{{"credential_id":"{id}","authorized":{authorized}}}"#);
        let reply = AuthReply::decode(payload.as_bytes()).unwrap();
        prop_assert_eq!(reply.credential_id, CredentialId::new(&id).unwrap());
        prop_assert_eq!(reply.authorized, authorized);
    }

    #[test]
    fn test_overlong_credential_rejected(id in "[0-9A-F]{33,64}") {
        let payload = format!(r#"{{"credential_id":"{id}","authorized":true}}"#);
        prop_assert!(AuthReply::decode(payload.as_bytes()).is_err());
    }
}
