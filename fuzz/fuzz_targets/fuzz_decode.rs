#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(ring) = bloomring::Ring::from_bytes(data) {
        assert!(ring.size() > 0);
        assert!(ring.hash_rounds() > 0);
        // a ceil-sized bit buffer decodes without its zero trailing byte
        let encoded = ring.to_bytes();
        assert!(data.starts_with(&encoded));
        assert!(data[encoded.len()..].iter().all(|&b| b == 0));
        assert!(data.len() - encoded.len() <= 1);
        ring.test(data);

        let other = bloomring::Ring::with_size(64, 3).unwrap();
        other.decode_from(data).unwrap();
        assert_eq!(other.to_bytes(), encoded);
    }

    let receiver = bloomring::Ring::with_size(1024, 3).unwrap();
    let before = receiver.to_bytes();
    match receiver.decode_storage(data, 3) {
        Ok(()) => {
            assert_eq!(receiver.size(), 1024);
            let n = data.len().min(128);
            assert_eq!(receiver.to_storage_bytes()[..n], data[..n]);
        }
        Err(_) => assert_eq!(receiver.to_bytes(), before),
    }
});
