pub mod domain;
pub mod ingest;
pub mod service;
pub mod storage;
pub mod time;

pub mod config {
    use std::path::PathBuf;

    pub const ECB_DAILY_XML_URL: &str =
        "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-daily.xml";
    pub const ECB_HISTORIC_ZIP_URL: &str =
        "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-hist.zip";

    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub database_path: Option<PathBuf>,
        pub daily_xml_url: Option<String>,
        pub historic_zip_url: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_path: std::env::var("EUROFX_DATABASE_PATH").ok().map(PathBuf::from),
                daily_xml_url: std::env::var("EUROFX_DAILY_XML_URL").ok(),
                historic_zip_url: std::env::var("EUROFX_HISTORIC_ZIP_URL").ok(),
            })
        }

        pub fn daily_xml_url(&self) -> &str {
            self.daily_xml_url.as_deref().unwrap_or(ECB_DAILY_XML_URL)
        }

        pub fn historic_zip_url(&self) -> &str {
            self.historic_zip_url
                .as_deref()
                .unwrap_or(ECB_HISTORIC_ZIP_URL)
        }
    }
}
