//! The compiled-in relation table.

use super::names::{
    ALGORITHM_NAMES, ATTRIBUTE_TYPE_NAMES, CERT_TYPE_FORMAT_NAMES, CONTEXT_TYPE_NAMES,
    CRL_TYPE_FORMAT_NAMES, CSP_FLAG_NAMES, CSP_TYPE_NAMES, DL_TYPE_NAMES, SERVICE_NAMES,
    USEE_NAMES,
};
use super::{
    AttributeDescriptor, AttributeFormat, DirectoryKind, NameTable, NestedLayout,
    RelationDescriptor,
};

/// Record type ids.
pub mod record_type {
    pub const OBJECT: u32 = 0x4000_0000;
    pub const CSSM: u32 = 0x4000_0001;
    pub const COMMON: u32 = 0x4000_0004;
    pub const CSP_PRIMARY: u32 = 0x4000_0005;
    pub const CSP_CAPABILITY: u32 = 0x4000_0006;
    pub const CSP_ENCAPSULATED_PRODUCT: u32 = 0x4000_0007;
    pub const CSP_SC_INFO: u32 = 0x4000_0008;
    pub const DL_PRIMARY: u32 = 0x4000_0009;
    pub const DL_ENCAPSULATED_PRODUCT: u32 = 0x4000_000A;
    pub const CL_PRIMARY: u32 = 0x4000_000B;
    pub const CL_ENCAPSULATED_PRODUCT: u32 = 0x4000_000C;
    pub const TP_PRIMARY: u32 = 0x4000_000D;
    pub const TP_OIDS: u32 = 0x4000_000E;
    pub const TP_ENCAPSULATED_PRODUCT: u32 = 0x4000_000F;
}

/// Relations a CSP or DL sub-service can own.
pub const SUBSERVICE_RECORD_TYPES: &[u32] = &[
    record_type::CSP_PRIMARY,
    record_type::CSP_CAPABILITY,
    record_type::CSP_ENCAPSULATED_PRODUCT,
    record_type::CSP_SC_INFO,
    record_type::DL_PRIMARY,
    record_type::DL_ENCAPSULATED_PRODUCT,
];

const fn string(name: &'static str) -> AttributeDescriptor {
    AttributeDescriptor {
        name,
        format: AttributeFormat::String,
        names: None,
    }
}

const fn uint32(name: &'static str) -> AttributeDescriptor {
    AttributeDescriptor {
        name,
        format: AttributeFormat::Uint32,
        names: None,
    }
}

const fn named(name: &'static str, table: NameTable) -> AttributeDescriptor {
    AttributeDescriptor {
        name,
        format: AttributeFormat::Uint32,
        names: Some(table),
    }
}

const fn multi(name: &'static str) -> AttributeDescriptor {
    AttributeDescriptor {
        name,
        format: AttributeFormat::MultiUint32,
        names: None,
    }
}

const fn multi_named(name: &'static str, table: NameTable) -> AttributeDescriptor {
    AttributeDescriptor {
        name,
        format: AttributeFormat::MultiUint32,
        names: Some(table),
    }
}

const fn blob(name: &'static str) -> AttributeDescriptor {
    AttributeDescriptor {
        name,
        format: AttributeFormat::Blob,
        names: None,
    }
}

const fn relation(
    record_type: u32,
    symbol: &'static str,
    name: &'static str,
    directory: DirectoryKind,
    attributes: &'static [AttributeDescriptor],
    indexes: &'static [&'static str],
) -> RelationDescriptor {
    RelationDescriptor {
        record_type,
        symbol,
        name,
        directory,
        attributes,
        indexes,
        nested: None,
    }
}

pub static RELATIONS: &[RelationDescriptor] = &[
    relation(
        record_type::OBJECT,
        "MDS_OBJECT_RECORDTYPE",
        "object",
        DirectoryKind::Object,
        &[
            string("ModuleID"),
            blob("Manifest"),
            string("ModuleName"),
            string("Path"),
            string("ProductVersion"),
        ],
        &["ModuleID", "Path"],
    ),
    relation(
        record_type::CSSM,
        "MDS_CDSADIR_CSSM_RECORDTYPE",
        "cssm",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            string("CDSAVersion"),
            string("Vendor"),
            string("Desc"),
            named("NativeServices", SERVICE_NAMES),
            uint32("OSType"),
        ],
        &["ModuleID"],
    ),
    relation(
        record_type::COMMON,
        "MDS_CDSADIR_COMMON_RECORDTYPE",
        "common",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            blob("Manifest"),
            string("ModuleName"),
            string("Path"),
            string("CDSAVersion"),
            string("Desc"),
            uint32("DynamicFlag"),
            uint32("MultiThreadFlag"),
            named("ServiceMask", SERVICE_NAMES),
        ],
        &["ModuleID"],
    ),
    relation(
        record_type::CSP_PRIMARY,
        "MDS_CDSADIR_CSP_PRIMARY_RECORDTYPE",
        "csp_primary",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            uint32("SSID"),
            blob("Manifest"),
            string("ModuleName"),
            string("ProductVersion"),
            string("ProductVendor"),
            named("CspType", CSP_TYPE_NAMES),
            named("CspFlags", CSP_FLAG_NAMES),
            uint32("CspCustomFlags"),
            multi_named("UseeTags", USEE_NAMES),
            multi("SampleTypes"),
            multi("AclSubjectTypes"),
            multi("AuthTags"),
        ],
        &["ModuleID", "SSID"],
    ),
    RelationDescriptor {
        record_type: record_type::CSP_CAPABILITY,
        symbol: "MDS_CDSADIR_CSP_CAPABILITY_RECORDTYPE",
        name: "csp_capabilities",
        directory: DirectoryKind::Service,
        attributes: &[
            string("ModuleID"),
            uint32("SSID"),
            named("UseeTag", USEE_NAMES),
            named("ContextType", CONTEXT_TYPE_NAMES),
            named("AlgType", ALGORITHM_NAMES),
            uint32("GroupId"),
            named("AttributeType", ATTRIBUTE_TYPE_NAMES),
            multi_named("AttributeValue", ALGORITHM_NAMES),
            string("Description"),
        ],
        indexes: &["ModuleID", "SSID", "AlgType"],
        nested: Some(NestedLayout {
            groups_key: "Capabilities",
            group_attributes: &["UseeTag", "ContextType", "AlgType", "Description"],
            entries_key: Some("Attributes"),
            entry_attributes: &["AttributeType", "AttributeValue"],
        }),
    },
    relation(
        record_type::CSP_ENCAPSULATED_PRODUCT,
        "MDS_CDSADIR_CSP_ENCAPSULATED_PRODUCT_RECORDTYPE",
        "csp_encapsulated_product",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            uint32("SSID"),
            string("ProductDesc"),
            string("ProductVendor"),
            string("ProductVersion"),
            uint32("ProductFlags"),
            uint32("CustomFlags"),
            string("StandardDesc"),
            string("StandardVersion"),
            string("ReaderDesc"),
            string("ReaderVendor"),
            uint32("ReaderFlags"),
        ],
        &["ModuleID", "SSID"],
    ),
    relation(
        record_type::CSP_SC_INFO,
        "MDS_CDSADIR_CSP_SC_INFO_RECORDTYPE",
        "csp_sc_info",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            uint32("SSID"),
            string("ScDesc"),
            string("ScVendor"),
            string("ScVersion"),
            string("ScFirmwareVersion"),
            uint32("ScFlags"),
            uint32("ScCustomFlags"),
            string("ScSerialNumber"),
        ],
        &["ModuleID", "SSID"],
    ),
    relation(
        record_type::DL_PRIMARY,
        "MDS_CDSADIR_DL_PRIMARY_RECORDTYPE",
        "dl_primary",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            uint32("SSID"),
            blob("Manifest"),
            string("ModuleName"),
            string("ProductVersion"),
            string("ProductVendor"),
            named("DLType", DL_TYPE_NAMES),
            uint32("QueryLimitsFlag"),
            multi("SampleTypes"),
            multi("AclSubjectTypes"),
            multi("AuthTags"),
            multi("ConjunctiveOps"),
            multi("RelationalOps"),
        ],
        &["ModuleID", "SSID"],
    ),
    relation(
        record_type::DL_ENCAPSULATED_PRODUCT,
        "MDS_CDSADIR_DL_ENCAPSULATED_PRODUCT_RECORDTYPE",
        "dl_encapsulated_product",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            uint32("SSID"),
            string("ProductDesc"),
            string("ProductVendor"),
            string("ProductVersion"),
            uint32("ProductFlags"),
            string("StandardDesc"),
            string("StandardVersion"),
            uint32("Protocol"),
        ],
        &["ModuleID", "SSID"],
    ),
    relation(
        record_type::CL_PRIMARY,
        "MDS_CDSADIR_CL_PRIMARY_RECORDTYPE",
        "cl_primary",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            uint32("SSID"),
            blob("Manifest"),
            string("ModuleName"),
            string("ProductVersion"),
            string("ProductVendor"),
            named("CertTypeFormat", CERT_TYPE_FORMAT_NAMES),
            named("CrlTypeFormat", CRL_TYPE_FORMAT_NAMES),
            blob("CertFieldNames"),
            multi("BundleTypeFormat"),
            multi("XlationTypeFormat"),
            blob("TemplateFieldNames"),
        ],
        &["ModuleID", "SSID"],
    ),
    relation(
        record_type::CL_ENCAPSULATED_PRODUCT,
        "MDS_CDSADIR_CL_ENCAPSULATED_PRODUCT_RECORDTYPE",
        "cl_encapsulated_product",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            uint32("SSID"),
            string("ProductDesc"),
            string("ProductVendor"),
            string("ProductVersion"),
            uint32("ProductFlags"),
            string("StandardDesc"),
            string("StandardVersion"),
        ],
        &["ModuleID", "SSID"],
    ),
    relation(
        record_type::TP_PRIMARY,
        "MDS_CDSADIR_TP_PRIMARY_RECORDTYPE",
        "tp_primary",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            uint32("SSID"),
            blob("Manifest"),
            string("ModuleName"),
            string("ProductVersion"),
            string("ProductVendor"),
            named("CertTypeFormat", CERT_TYPE_FORMAT_NAMES),
            multi("SampleTypes"),
            multi("AclSubjectTypes"),
            multi("AuthTags"),
        ],
        &["ModuleID", "SSID"],
    ),
    RelationDescriptor {
        record_type: record_type::TP_OIDS,
        symbol: "MDS_CDSADIR_TP_OIDS_RECORDTYPE",
        name: "tp_policy_oids",
        directory: DirectoryKind::Service,
        attributes: &[string("ModuleID"), uint32("SSID"), blob("OID"), blob("Value")],
        indexes: &["ModuleID", "SSID"],
        nested: Some(NestedLayout {
            groups_key: "Policies",
            group_attributes: &["OID", "Value"],
            entries_key: None,
            entry_attributes: &[],
        }),
    },
    relation(
        record_type::TP_ENCAPSULATED_PRODUCT,
        "MDS_CDSADIR_TP_ENCAPSULATED_PRODUCT_RECORDTYPE",
        "tp_encapsulated_product",
        DirectoryKind::Service,
        &[
            string("ModuleID"),
            uint32("SSID"),
            string("ProductDesc"),
            string("ProductVendor"),
            string("ProductVersion"),
            uint32("ProductFlags"),
            uint32("CustomFlags"),
            string("StandardDesc"),
            string("StandardVersion"),
        ],
        &["ModuleID", "SSID"],
    ),
];
