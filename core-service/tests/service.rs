use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{HttpClient, HttpRequest, HttpResponse, SettingsStore};
use core_downloads::ChapterRequest;
use core_extensions::sandbox::{
    ExtensionFactory, HtmlParser, SandboxCapabilities, SourceExtension, StaticScriptEngine,
};
use core_extensions::Extension;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, DownloadEvent, Receiver};
use core_service::CoreService;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use mockall::mock;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mock! {
    Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

#[derive(Default)]
struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.values.lock().keys().cloned().collect())
    }
}

fn png() -> Vec<u8> {
    let img = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

struct ComicSource;

#[async_trait]
impl SourceExtension for ComicSource {
    async fn invoke(&self, method: &str, args: Value) -> core_extensions::Result<Value> {
        match method {
            "getChapterDetails" => Ok(json!({
                "id": args["chapterId"],
                "mangaId": args["mangaId"],
                "pages": [
                    "https://cdn.test/1.png",
                    {"url": "https://cdn.test/2.png", "drm": true}
                ]
            })),
            _ => Err(core_extensions::ExtensionError::method(method, "not implemented")),
        }
    }
}

struct ComicFactory;

impl ExtensionFactory for ComicFactory {
    fn construct(
        &self,
        _caps: SandboxCapabilities,
        _html: Option<Arc<dyn HtmlParser>>,
    ) -> Result<Arc<dyn SourceExtension>, String> {
        Ok(Arc::new(ComicSource))
    }
}

fn http() -> Arc<dyn HttpClient> {
    let image = png();
    let mut http = MockHttp::new();
    http.expect_execute().returning(move |_| {
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: image.clone().into(),
        })
    });
    Arc::new(http)
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("core-service-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

async fn service(dir: &PathBuf) -> CoreService {
    let config = CoreConfig::builder()
        .data_dir(dir.clone())
        .http_client(http())
        .settings_store(Arc::new(MemorySettings::default()))
        .build()
        .unwrap();
    let engine = StaticScriptEngine::new().link("Comic", Arc::new(ComicFactory));
    let core = CoreService::new(config, Arc::new(engine)).await.unwrap();

    core.catalog().register(Extension {
        id: "comic".to_string(),
        name: "Comic".to_string(),
        version: "1.0.0".to_string(),
        script_url: "https://repo.test/comic.js".to_string(),
        icon_url: None,
    });
    core.catalog().install_script("comic", r#"{"register":["Comic"]}"#);
    core
}

fn request(source_id: &str) -> ChapterRequest {
    ChapterRequest {
        manga_id: "m1".to_string(),
        chapter_id: "c1".to_string(),
        source_id: source_id.to_string(),
        manga_title: "Manga".to_string(),
        chapter_title: "Chapter 1".to_string(),
        chapter_number: 1.0,
        manga_cover: None,
    }
}

async fn finished(events: &mut Receiver<CoreEvent>) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(CoreEvent::Download(event)) = events.recv().await {
                if matches!(
                    event,
                    DownloadEvent::Completed { .. } | DownloadEvent::Failed { .. }
                ) {
                    return event;
                }
            }
        }
    })
    .await
    .expect("download did not finish")
}

#[tokio::test]
async fn test_chapter_downloads_through_the_bridge() {
    let dir = temp_dir("download");
    let core = service(&dir).await;
    let mut events = core.subscribe_events();

    assert!(core.downloads().download_chapter(request("comic")).await);
    let event = finished(&mut events).await;
    assert!(matches!(
        event,
        DownloadEvent::Completed {
            saved_pages: 2,
            total_pages: 2,
            ..
        }
    ));

    let chapter_dir = dir.join("downloads").join("m1").join("c1");
    assert_eq!(std::fs::read(chapter_dir.join("0.jpg")).unwrap(), png());
    assert_eq!(std::fs::read(chapter_dir.join("1.jpg")).unwrap(), png());
    assert!(core.downloads().is_downloaded("c1").await.unwrap());

    core.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_unknown_source_fails_the_job() {
    let dir = temp_dir("unknown");
    let core = service(&dir).await;
    let mut events = core.subscribe_events();

    core.downloads().download_chapter(request("missing")).await;
    let event = finished(&mut events).await;
    assert!(matches!(event, DownloadEvent::Failed { .. }));
    assert!(core.downloads().jobs().is_empty());

    core.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

#[cfg(feature = "desktop-shims")]
#[tokio::test]
async fn test_default_settings_store_is_opened() {
    let dir = temp_dir("settings");
    let config = CoreConfig::builder()
        .data_dir(dir.clone())
        .http_client(http())
        .build()
        .unwrap();
    let core = CoreService::new(config, Arc::new(StaticScriptEngine::new()))
        .await
        .unwrap();

    assert!(dir.join("settings.db").exists());
    core.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}
