use issuer_hooks::{sign_authorization, verify_reader, Key, Keyring};

fn main() {
    let key = Key::new("kid-1", "c3VwZXJzZWNyZXQ=");
    let keyring = Keyring::new(vec![key.clone()]);

    let payload = br#"{"id":"m1","hook_id":"h1","type":"transaction","version":"1.0.0"}"#;
    let authorization = sign_authorization(&key, payload).unwrap();

    let body = verify_reader(&keyring, Some(&authorization), &payload[..]).unwrap();
    assert_eq!(body, payload);

    let mut tampered = payload.to_vec();
    tampered[7] ^= 0x01;
    let _ = verify_reader(&keyring, Some(&authorization), tampered.as_slice()).unwrap_err();
}
