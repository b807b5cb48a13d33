use bitflags::bitflags;

use crate::context::Capabilities;

bitflags! {
    /// This flags appears in the KRB_AS_REQ and KRB_TGS_REQ requests to
    /// the KDC and indicates the flags that the client wants set on the tickets.
    ///
    /// [KDCOptions](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct KdcOptions: u32 {
        const FORWARDABLE = 0x4000_0000;
        const FORWARDED = 0x2000_0000;
        const PROXIABLE = 0x1000_0000;
        const PROXY = 0x0800_0000;
        const ALLOW_POSTDATE = 0x0400_0000;
        const POSTDATED = 0x0200_0000;
        const RENEWABLE = 0x0080_0000;
        const OPT_HARDWARE_AUTH = 0x0010_0000;
        const CANONICALIZE = 0x0001_0000;
        const DISABLE_TRANSITED_CHECK = 0x0000_0020;
        const RENEWABLE_OK = 0x0000_0010;
        const ENC_TKT_IN_SKEY = 0x0000_0008;
        const RENEW = 0x0000_0002;
        const VALIDATE = 0x0000_0001;
    }
}

impl KdcOptions {
    /// Renewable, canonicalize and renewable-ok.
    pub const AS_REQ_DEFAULT: Self = Self::RENEWABLE.union(Self::CANONICALIZE).union(Self::RENEWABLE_OK);
    /// Renewable and canonicalize.
    pub const TGS_REQ_DEFAULT: Self = Self::RENEWABLE.union(Self::CANONICALIZE);
}

bitflags! {
    /// This flags appears in the application request (KRB_AP_REQ) and
    /// affects the way the request is processed.
    ///
    /// [APOptions](https://www.rfc-editor.org/rfc/rfc4120#section-5.5.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ApOptions: u32 {
        const USE_SESSION_KEY = 0x4000_0000;
        const MUTUAL_REQUIRED = 0x2000_0000;
    }
}

impl From<Capabilities> for ApOptions {
    fn from(capabilities: Capabilities) -> Self {
        let mut ap_options = ApOptions::empty();

        // the DCE flow always carries an AP-REP
        if capabilities.intersects(Capabilities::MUTUAL_AUTHN | Capabilities::DCE_STYLE) {
            ap_options |= ApOptions::MUTUAL_REQUIRED;
        }

        ap_options
    }
}

bitflags! {
    /// The checksum "Flags" field is used to convey service options or extension negotiation information.
    ///
    /// * [Checksum Flags Field](https://datatracker.ietf.org/doc/html/rfc4121#section-4.1.1.1)
    /// * [MS-KILE 3.2.5.2 Authenticator Checksum Flags](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-kile/387806fc-ed78-445e-afd8-c5639fe4a90a)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GssFlags: u32 {
        const GSS_C_DELEG_FLAG      = 1;
        const GSS_C_MUTUAL_FLAG     = 2;
        const GSS_C_REPLAY_FLAG     = 4;
        const GSS_C_SEQUENCE_FLAG   = 8;
        const GSS_C_CONF_FLAG       = 16;
        const GSS_C_INTEG_FLAG      = 32;
        const GSS_C_ANON_FLAG       = 64;
        const GSS_C_PROT_READY_FLAG = 128;
        const GSS_C_TRANS_FLAG      = 256;
        const GSS_C_DELEG_POLICY_FLAG = 0x8000;

        /// Windows status codes may be returned in the `e-data` of a KRB-ERROR.
        const GSS_C_EXTENDED_ERROR_FLAG = 0x4000;
        /// The server may identify the client but not impersonate it.
        const GSS_C_IDENTIFY_FLAG = 0x2000;
        /// Three legs of authentication, as DCE RPC initially expected.
        const GSS_C_DCE_STYLE = 0x1000;
    }
}

impl From<Capabilities> for GssFlags {
    fn from(capabilities: Capabilities) -> Self {
        let mut flags = GssFlags::empty();

        if capabilities.contains(Capabilities::MUTUAL_AUTHN) {
            flags |= GssFlags::GSS_C_MUTUAL_FLAG;
        }
        if capabilities.contains(Capabilities::REPLAY_DETECTION) {
            flags |= GssFlags::GSS_C_REPLAY_FLAG;
        }
        if capabilities.contains(Capabilities::SEQUENCING) {
            flags |= GssFlags::GSS_C_SEQUENCE_FLAG;
        }
        if capabilities.contains(Capabilities::CONFIDENTIALITY) {
            flags |= GssFlags::GSS_C_CONF_FLAG;
        }
        if capabilities.contains(Capabilities::INTEGRITY) {
            flags |= GssFlags::GSS_C_INTEG_FLAG;
        }
        if capabilities.contains(Capabilities::ANONYMITY) {
            flags |= GssFlags::GSS_C_ANON_FLAG;
        }
        if capabilities.contains(Capabilities::IDENTIFY) {
            flags |= GssFlags::GSS_C_IDENTIFY_FLAG;
        }
        if capabilities.contains(Capabilities::DCE_STYLE) {
            // Windows rejects a DCE style AP-REQ without the mutual flag
            flags |= GssFlags::GSS_C_DCE_STYLE | GssFlags::GSS_C_MUTUAL_FLAG;
        }

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dce_style_requires_mutual_authentication() {
        let capabilities = Capabilities::DCE_STYLE | Capabilities::INTEGRITY;

        assert_eq!(ApOptions::from(capabilities), ApOptions::MUTUAL_REQUIRED);
        assert_eq!(
            GssFlags::from(capabilities),
            GssFlags::GSS_C_DCE_STYLE | GssFlags::GSS_C_MUTUAL_FLAG | GssFlags::GSS_C_INTEG_FLAG
        );
        assert!(ApOptions::from(Capabilities::INTEGRITY).is_empty());
    }

    #[test]
    fn default_kdc_options_match_windows_requests() {
        assert_eq!(KdcOptions::AS_REQ_DEFAULT.bits().to_be_bytes(), [0x00, 0x81, 0x00, 0x10]);
        assert_eq!(KdcOptions::TGS_REQ_DEFAULT.bits().to_be_bytes(), [0x00, 0x81, 0x00, 0x00]);
    }
}
