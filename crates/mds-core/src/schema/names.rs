//! Symbolic name/value tables used when descriptors spell uint32 attributes
//! as CDSA constant names.

/// Name to value mapping for one attribute.
pub type NameTable = &'static [(&'static str, u32)];

/// Resolve `name` in `table`.
pub fn lookup(table: NameTable, name: &str) -> Option<u32> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, value)| *value)
}

pub const SERVICE_NAMES: NameTable = &[
    ("CSSM_SERVICE_CSSM", 0x1),
    ("CSSM_SERVICE_CSP", 0x2),
    ("CSSM_SERVICE_DL", 0x4),
    ("CSSM_SERVICE_CL", 0x8),
    ("CSSM_SERVICE_TP", 0x10),
    ("CSSM_SERVICE_AC", 0x20),
    ("CSSM_SERVICE_KR", 0x40),
];

pub const CONTEXT_TYPE_NAMES: NameTable = &[
    ("CSSM_ALGCLASS_NONE", 0),
    ("CSSM_ALGCLASS_CUSTOM", 1),
    ("CSSM_ALGCLASS_SIGNATURE", 2),
    ("CSSM_ALGCLASS_SYMMETRIC", 3),
    ("CSSM_ALGCLASS_DIGEST", 4),
    ("CSSM_ALGCLASS_RANDOMGEN", 5),
    ("CSSM_ALGCLASS_UNIQUEGEN", 6),
    ("CSSM_ALGCLASS_MAC", 7),
    ("CSSM_ALGCLASS_ASYMMETRIC", 8),
    ("CSSM_ALGCLASS_KEYGEN", 9),
    ("CSSM_ALGCLASS_DERIVEKEY", 10),
];

pub const ALGORITHM_NAMES: NameTable = &[
    ("CSSM_ALGID_NONE", 0),
    ("CSSM_ALGID_CUSTOM", 1),
    ("CSSM_ALGID_DH", 2),
    ("CSSM_ALGID_PH", 3),
    ("CSSM_ALGID_KEA", 4),
    ("CSSM_ALGID_MD2", 5),
    ("CSSM_ALGID_MD4", 6),
    ("CSSM_ALGID_MD5", 7),
    ("CSSM_ALGID_SHA1", 8),
    ("CSSM_ALGID_NHASH", 9),
    ("CSSM_ALGID_HAVAL", 10),
    ("CSSM_ALGID_RIPEMD", 11),
    ("CSSM_ALGID_IBCHASH", 12),
    ("CSSM_ALGID_RIPEMAC", 13),
    ("CSSM_ALGID_DES", 14),
    ("CSSM_ALGID_DESX", 15),
    ("CSSM_ALGID_RDES", 16),
    ("CSSM_ALGID_3DES_3KEY_EDE", 17),
    ("CSSM_ALGID_3DES_2KEY_EDE", 18),
    ("CSSM_ALGID_3DES_1KEY_EEE", 19),
    ("CSSM_ALGID_3DES_3KEY_EEE", 20),
    ("CSSM_ALGID_3DES_2KEY_EEE", 21),
    ("CSSM_ALGID_IDEA", 22),
    ("CSSM_ALGID_RC2", 23),
    ("CSSM_ALGID_RC5", 24),
    ("CSSM_ALGID_RC4", 25),
    ("CSSM_ALGID_SEAL", 26),
    ("CSSM_ALGID_CAST", 27),
    ("CSSM_ALGID_BLOWFISH", 28),
    ("CSSM_ALGID_SKIPJACK", 29),
    ("CSSM_ALGID_RSA", 42),
    ("CSSM_ALGID_DSA", 43),
    ("CSSM_ALGID_MD5WithRSA", 44),
    ("CSSM_ALGID_MD2WithRSA", 45),
    ("CSSM_ALGID_ElGamal", 46),
    ("CSSM_ALGID_MD2Random", 47),
    ("CSSM_ALGID_MD5Random", 48),
    ("CSSM_ALGID_SHARandom", 49),
    ("CSSM_ALGID_DESRandom", 50),
    ("CSSM_ALGID_SHA1WithRSA", 51),
];

pub const USEE_NAMES: NameTable = &[
    ("CSSM_USEE_NONE", 0),
    ("CSSM_USEE_DOMESTIC", 1),
    ("CSSM_USEE_FINANCIAL", 2),
    ("CSSM_USEE_KRLE", 3),
    ("CSSM_USEE_KRENT", 4),
    ("CSSM_USEE_SSL", 5),
    ("CSSM_USEE_AUTHENTICATION", 6),
    ("CSSM_USEE_KEYEXCH", 7),
    ("CSSM_USEE_MEDICAL", 8),
    ("CSSM_USEE_INSURANCE", 9),
    ("CSSM_USEE_WEAK", 10),
];

pub const CSP_TYPE_NAMES: NameTable = &[
    ("CSSM_CSP_SOFTWARE", 1),
    ("CSSM_CSP_HARDWARE", 2),
    ("CSSM_CSP_HYBRID", 3),
];

pub const CSP_FLAG_NAMES: NameTable = &[
    ("CSSM_CSP_STORES_PRIVATE_KEYS", 0x0100_0000),
    ("CSSM_CSP_STORES_PUBLIC_KEYS", 0x0200_0000),
    ("CSSM_CSP_STORES_SESSION_KEYS", 0x0400_0000),
    ("CSSM_CSP_STORES_CERTIFICATES", 0x0800_0000),
    ("CSSM_CSP_STORES_GENERIC", 0x1000_0000),
];

pub const ATTRIBUTE_TYPE_NAMES: NameTable = &[
    ("CSSM_ATTRIBUTE_NONE", 0),
    ("CSSM_ATTRIBUTE_DATA_NONE", 0x0000_0000),
    ("CSSM_ATTRIBUTE_DATA_UINT32", 0x1000_0000),
    ("CSSM_ATTRIBUTE_DATA_CSSM_DATA", 0x2000_0000),
    ("CSSM_ATTRIBUTE_DATA_CRYPTO_DATA", 0x3000_0000),
    ("CSSM_ATTRIBUTE_DATA_KEY", 0x4000_0000),
    ("CSSM_ATTRIBUTE_DATA_STRING", 0x5000_0000),
    ("CSSM_ATTRIBUTE_DATA_DATE", 0x6000_0000),
    ("CSSM_ATTRIBUTE_DATA_RANGE", 0x7000_0000),
    ("CSSM_ATTRIBUTE_DATA_VERSION", 0x0100_0000),
    ("CSSM_ATTRIBUTE_CUSTOM", 0x2000_0001),
    ("CSSM_ATTRIBUTE_DESCRIPTION", 0x5000_0002),
    ("CSSM_ATTRIBUTE_KEY", 0x4000_0003),
    ("CSSM_ATTRIBUTE_INIT_VECTOR", 0x2000_0004),
    ("CSSM_ATTRIBUTE_SALT", 0x2000_0005),
    ("CSSM_ATTRIBUTE_PADDING", 0x1000_0006),
    ("CSSM_ATTRIBUTE_RANDOM", 0x2000_0007),
    ("CSSM_ATTRIBUTE_KEY_LENGTH", 0x1000_000A),
    ("CSSM_ATTRIBUTE_KEY_LENGTH_RANGE", 0x7000_000B),
    ("CSSM_ATTRIBUTE_BLOCK_SIZE", 0x1000_000C),
    ("CSSM_ATTRIBUTE_OUTPUT_SIZE", 0x1000_000D),
    ("CSSM_ATTRIBUTE_ROUNDS", 0x1000_000E),
    ("CSSM_ATTRIBUTE_IV_SIZE", 0x1000_000F),
    ("CSSM_ATTRIBUTE_MODE", 0x1000_0013),
];

pub const DL_TYPE_NAMES: NameTable = &[
    ("CSSM_DL_UNKNOWN", 0),
    ("CSSM_DL_CUSTOM", 1),
    ("CSSM_DL_LDAP", 2),
    ("CSSM_DL_ODBC", 3),
    ("CSSM_DL_PKCS11", 4),
    ("CSSM_DL_FFS", 5),
    ("CSSM_DL_MEMORY", 6),
    ("CSSM_DL_REMOTEDIR", 7),
];

/// Certificate types and encodings; descriptors pack them as
/// `"<<CSSM_CERT_X_509v3 | CSSM_CERT_ENCODING_DER"`.
pub const CERT_TYPE_FORMAT_NAMES: NameTable = &[
    ("CSSM_CERT_UNKNOWN", 0),
    ("CSSM_CERT_X_509v1", 1),
    ("CSSM_CERT_X_509v2", 2),
    ("CSSM_CERT_X_509v3", 3),
    ("CSSM_CERT_PGP", 4),
    ("CSSM_CERT_SPKI", 5),
    ("CSSM_CERT_SDSIv1", 6),
    ("CSSM_CERT_Intel", 8),
    ("CSSM_CERT_ENCODING_UNKNOWN", 0),
    ("CSSM_CERT_ENCODING_CUSTOM", 1),
    ("CSSM_CERT_ENCODING_BER", 2),
    ("CSSM_CERT_ENCODING_DER", 3),
    ("CSSM_CERT_ENCODING_NDR", 4),
    ("CSSM_CERT_ENCODING_SEXPR", 5),
    ("CSSM_CERT_ENCODING_PGP", 6),
];

pub const CRL_TYPE_FORMAT_NAMES: NameTable = &[
    ("CSSM_CRL_TYPE_UNKNOWN", 0),
    ("CSSM_CRL_TYPE_X_509v1", 1),
    ("CSSM_CRL_TYPE_X_509v2", 2),
    ("CSSM_CRL_ENCODING_UNKNOWN", 0),
    ("CSSM_CRL_ENCODING_CUSTOM", 1),
    ("CSSM_CRL_ENCODING_BER", 2),
    ("CSSM_CRL_ENCODING_DER", 3),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup(SERVICE_NAMES, "CSSM_SERVICE_TP"), Some(0x10));
        assert_eq!(lookup(ALGORITHM_NAMES, "CSSM_ALGID_RSA"), Some(42));
        assert_eq!(lookup(ALGORITHM_NAMES, "CSSM_ALGID_NOPE"), None);
    }

    #[test]
    fn test_tables_have_unique_names() {
        for table in [
            SERVICE_NAMES,
            CONTEXT_TYPE_NAMES,
            ALGORITHM_NAMES,
            USEE_NAMES,
            CSP_TYPE_NAMES,
            CSP_FLAG_NAMES,
            ATTRIBUTE_TYPE_NAMES,
            DL_TYPE_NAMES,
            CERT_TYPE_FORMAT_NAMES,
            CRL_TYPE_FORMAT_NAMES,
        ] {
            let mut names: Vec<_> = table.iter().map(|(name, _)| *name).collect();
            names.sort_unstable();
            let len = names.len();
            names.dedup();
            assert_eq!(names.len(), len);
        }
    }
}
