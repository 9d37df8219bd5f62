use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;

use crate::context::MigrationContext;
use crate::ledger::{DownloadedImage, Ledger, Outcome};
use crate::links::{LinkRecord, image_filenames, load_inventory};

pub trait ImageFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpImageFetcher {
    client: Client,
    user_agent: String,
}

impl HttpImageFetcher {
    pub fn new(user_agent: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build image download client")?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.user_agent.clone())
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {status}");
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub images: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn download(context: &MigrationContext) -> Result<DownloadReport> {
    let records = load_inventory(&context.paths.links_path())?;
    let destination = context.config.destination_settings();
    let mut fetcher = HttpImageFetcher::new(&destination.user_agent, destination.timeout_ms)?;
    let mut ledger = Ledger::new(context.paths.downloaded_images_path());
    download_with_fetcher(
        &mut fetcher,
        &records,
        &context.paths.images_dir,
        &mut ledger,
    )
}

pub fn download_with_fetcher<F: ImageFetcher>(
    fetcher: &mut F,
    records: &[LinkRecord],
    images_dir: &Path,
    ledger: &mut Ledger<DownloadedImage>,
) -> Result<DownloadReport> {
    fs::create_dir_all(images_dir)
        .with_context(|| format!("failed to create {}", images_dir.display()))?;
    let names = image_filenames(records);
    let mut report = DownloadReport::default();

    for record in records.iter().filter(|record| record.is_image()) {
        report.images += 1;
        let filename = names.get(&record.raw_url).cloned().unwrap_or_default();
        let path = images_dir.join(&filename);
        let (result, reason) = if filename.is_empty() {
            report.failed += 1;
            (Outcome::Nok, "url has no file name".to_string())
        } else if path.exists() {
            report.skipped += 1;
            (Outcome::Skip, "already downloaded".to_string())
        } else {
            match fetcher
                .fetch(&record.raw_url)
                .and_then(|bytes| {
                    fs::write(&path, bytes)
                        .with_context(|| format!("failed to write {}", path.display()))
                }) {
                Ok(()) => {
                    tracing::info!(%filename, "downloaded");
                    report.downloaded += 1;
                    (Outcome::Ok, String::new())
                }
                Err(error) => {
                    tracing::warn!(url = %record.raw_url, "download failed: {error:#}");
                    report.failed += 1;
                    (Outcome::Nok, format!("{error:#}"))
                }
            }
        };
        ledger.push(DownloadedImage {
            result,
            filename,
            url: record.raw_url.clone(),
            reason,
        });
    }

    ledger.save()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use anyhow::bail;
    use tempfile::tempdir;

    use super::{ImageFetcher, download_with_fetcher};
    use crate::ledger::{Ledger, Outcome};
    use crate::links::{LinkKind, LinkRecord, image_filenames};

    #[derive(Default)]
    struct MockFetcher {
        files: BTreeMap<String, Vec<u8>>,
        calls: usize,
    }

    impl ImageFetcher for MockFetcher {
        fn fetch(&mut self, url: &str) -> anyhow::Result<Vec<u8>> {
            self.calls += 1;
            match self.files.get(url) {
                Some(bytes) => Ok(bytes.clone()),
                None => bail!("HTTP 404 Not Found"),
            }
        }
    }

    fn image(url: &str) -> LinkRecord {
        LinkRecord {
            sequence: 1,
            filename: "intro.html".to_string(),
            title: "Intro".to_string(),
            kind: LinkKind::Image,
            raw_url: url.to_string(),
        }
    }

    #[test]
    fn same_basename_from_different_urls_downloads_both() {
        let temp = tempdir().expect("tempdir");
        let images = temp.path().join("images");
        let mut fetcher = MockFetcher::default();
        fetcher
            .files
            .insert("https://s3/one/a.png".to_string(), b"ONE".to_vec());
        fetcher
            .files
            .insert("https://s3/two/a.png".to_string(), b"TWO".to_vec());

        let records = vec![image("https://s3/one/a.png"), image("https://s3/two/a.png")];
        let mut ledger = Ledger::new(temp.path().join("downloaded-images.csv"));
        let report =
            download_with_fetcher(&mut fetcher, &records, &images, &mut ledger).expect("download");

        assert_eq!(report.downloaded, 2);
        assert_eq!(report.skipped, 0);
        let names = image_filenames(&records);
        assert_eq!(
            fs::read(images.join(&names["https://s3/one/a.png"])).expect("read one"),
            b"ONE"
        );
        assert_eq!(
            fs::read(images.join(&names["https://s3/two/a.png"])).expect("read two"),
            b"TWO"
        );
    }

    #[test]
    fn downloads_new_images_and_skips_existing_files() {
        let temp = tempdir().expect("tempdir");
        let images = temp.path().join("images");
        let mut fetcher = MockFetcher::default();
        fetcher
            .files
            .insert("https://s3/u/a.png?x=1".to_string(), b"A".to_vec());

        let records = vec![
            image("https://s3/u/a.png?x=1"),
            image("https://s3/u/a.png?x=1"),
            image("https://s3/u/gone.png"),
        ];
        let mut ledger = Ledger::new(temp.path().join("downloaded-images.csv"));
        let report =
            download_with_fetcher(&mut fetcher, &records, &images, &mut ledger).expect("download");

        assert_eq!(report.downloaded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(fetcher.calls, 2);
        assert_eq!(fs::read(images.join("a.png")).expect("read image"), b"A");
        let results = ledger.rows().iter().map(|row| row.result).collect::<Vec<_>>();
        assert_eq!(results, vec![Outcome::Ok, Outcome::Skip, Outcome::Nok]);
        assert!(ledger.rows()[2].reason.contains("404"));
    }
}
