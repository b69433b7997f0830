use std::time::Duration;

use x509_cert::der::pem::LineEnding;

/// The default validity of both the CA and the serving certificate,
/// `175300h` (roughly 20 years).
pub const DEFAULT_CA_VALIDITY: Duration = Duration::from_secs(175_300 * 60 * 60);

pub const PEM_LINE_ENDING: LineEnding = LineEnding::LF;

/// Relative distinguished names appended to every subject common name, in
/// RFC 4514 order (most specific first).
pub const TKE_SUBJECT_SUFFIX: &str =
    "OU=TKE,O=Tencent Technology (Shenzhen) Company Limited,L=ShenZhen,ST=GuangDong,C=CN";

/// Builds an RFC 4514 subject string for the given common name.
pub fn tke_subject(common_name: &str) -> String {
    format!("CN={common_name},{TKE_SUBJECT_SUFFIX}")
}
