//! 基本型の Property-Based Testing

use proptest::prelude::*;
use shiguredo_fmp4_stream::{
    BoxHeader, BoxSize, BoxType, Decode, Encode, ErrorKind, FullBoxFlags, SampleFlags,
};

/// BoxType を生成する Strategy（uuid 以外の通常の種別と UUID 形式の両方）
fn arb_box_type() -> impl Strategy<Value = BoxType> {
    prop_oneof![
        any::<[u8; 4]>()
            .prop_filter("uuid is encoded as BoxType::Uuid", |ty| ty != b"uuid")
            .prop_map(BoxType::Normal),
        any::<[u8; 16]>().prop_map(BoxType::Uuid),
    ]
}

/// BoxType に対して有効なサイズを持つ BoxHeader を生成する Strategy
fn arb_box_header() -> impl Strategy<Value = BoxHeader> {
    (arb_box_type(), any::<bool>(), any::<u64>()).prop_map(|(box_type, large, n)| {
        let box_size = if large {
            let min = 16 + box_type.external_size() as u64 - 4;
            BoxSize::U64(min + n % (u64::MAX - min))
        } else {
            let min = 4 + box_type.external_size() as u32;
            BoxSize::U32(min + (n % u64::from(u32::MAX - min)) as u32)
        };
        BoxHeader::new(box_type, box_size)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // BoxHeader の Roundtrip
    #[test]
    fn box_header_roundtrip(header in arb_box_header()) {
        let encoded = header.encode_to_vec().unwrap();
        prop_assert_eq!(encoded.len(), header.external_size());

        let (decoded, size) = BoxHeader::decode(&encoded).unwrap();
        prop_assert_eq!(size, encoded.len());
        prop_assert_eq!(decoded, header);
    }

    // 64 bit サイズの場合は largesize が usertype より前に置かれる
    #[test]
    fn large_size_precedes_user_type(uuid in any::<[u8; 16]>(), size in 32u64..u64::MAX) {
        let header = BoxHeader::new(BoxType::Uuid(uuid), BoxSize::U64(size));
        let encoded = header.encode_to_vec().unwrap();

        prop_assert_eq!(&encoded[0..4], &1u32.to_be_bytes()[..]);
        prop_assert_eq!(&encoded[4..8], b"uuid");
        prop_assert_eq!(&encoded[8..16], &size.to_be_bytes()[..]);
        prop_assert_eq!(&encoded[16..32], &uuid[..]);
    }

    // ヘッダーの途中で途切れたバイト列は MalformedHeader エラーになる
    #[test]
    fn truncated_header_is_malformed(header in arb_box_header(), cut in 0usize..32) {
        let encoded = header.encode_to_vec().unwrap();
        let cut = cut % encoded.len();
        let err = BoxHeader::decode(&encoded[..cut]).unwrap_err();
        prop_assert_eq!(err.kind, ErrorKind::MalformedHeader);
    }

    // ヘッダー長より小さいサイズは拒否される
    #[test]
    fn undersized_box_is_rejected(ty in any::<[u8; 4]>(), size in 2u32..8) {
        prop_assume!(&ty != b"uuid");
        let mut bytes = size.to_be_bytes().to_vec();
        bytes.extend_from_slice(&ty);
        let err = BoxHeader::decode(&bytes).unwrap_err();
        prop_assert_eq!(err.kind, ErrorKind::MalformedHeader);
        prop_assert_eq!(err.box_type, Some(BoxType::Normal(ty)));
    }

    // 任意のバイト列をデコードしても panic しない
    #[test]
    fn box_header_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..40)) {
        if let Ok((header, size)) = BoxHeader::decode(&bytes) {
            prop_assert_eq!(size, header.external_size());
            prop_assert!(header.box_size.get() >= size as u64);
        }
    }

    // FullBoxFlags の Roundtrip
    #[test]
    fn full_box_flags_roundtrip(value in 0u32..=0x00FF_FFFF) {
        let flags = FullBoxFlags::new(value);
        let encoded = flags.encode_to_vec().unwrap();
        prop_assert_eq!(encoded.len(), 3);

        let (decoded, size) = FullBoxFlags::decode(&encoded).unwrap();
        prop_assert_eq!(size, 3);
        prop_assert_eq!(decoded.get(), value);
        for i in 0..24 {
            prop_assert_eq!(decoded.is_set(i), value & (1 << i) != 0);
        }
    }

    // SampleFlags の各フィールドはビット位置に対応する
    #[test]
    fn sample_flags_fields(value in any::<u32>()) {
        let flags = SampleFlags::new(value);
        prop_assert_eq!(flags.sample_depends_on(), ((value >> 24) & 0b11) as u8);
        prop_assert_eq!(flags.sample_is_non_sync_sample(), (value >> 16) & 1 == 1);
        prop_assert_eq!(flags.sample_degradation_priority(), value as u16);
    }
}
