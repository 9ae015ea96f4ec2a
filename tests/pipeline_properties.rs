//! Pipeline behavior with in-memory fetchers and a probing renderer

use bytes::Bytes;
use cardshot::encode::encode_png;
use cardshot::executor::current_worker;
use cardshot::prefetch::collect_image_urls;
use cardshot::rendering::{Bitmap, ImageResolver, Size};
use cardshot::{
    AffinityExecutor, CancelToken, Card, CardRenderer, Error, Fetcher, PrefetchOptions, Prefetcher, RenderOptions,
    Renderer, Result,
};
use futures::future::BoxFuture;
use image::{Rgba, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn png_bytes() -> Bytes {
    let bmp = Bitmap {
        image: RgbaImage::from_pixel(4, 2, Rgba([200, 10, 10, 255])),
    };
    Bytes::from(encode_png(&bmp, 96.0).unwrap().into_inner())
}

/// Serves a PNG for every URL except those listed as failing; counts calls
/// and how many fetches have finished.
#[derive(Default)]
struct FakeFetcher {
    calls: Mutex<HashMap<String, usize>>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    settled: Arc<AtomicUsize>,
}

impl FakeFetcher {
    fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl Fetcher for FakeFetcher {
    fn fetch_bytes<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
            if let Some(d) = self.delays.get(url) {
                tokio::time::sleep(*d).await;
            }
            self.settled.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(url) {
                Err(Error::FetchError {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                })
            } else {
                Ok(png_bytes())
            }
        })
    }
}

/// Shared observations from every probe renderer in a pool
#[derive(Clone, Default)]
struct Probe {
    events: Arc<Mutex<Vec<(usize, &'static str)>>>,
    busy: Arc<Mutex<HashSet<usize>>>,
    overlaps: Arc<AtomicUsize>,
    resolved: Arc<Mutex<Vec<(String, Option<Vec<u8>>)>>>,
    fetch_settled: Arc<AtomicUsize>,
    settled_at_build: Arc<Mutex<Vec<usize>>>,
    builds: Arc<AtomicUsize>,
}

struct ProbeRenderer {
    probe: Probe,
    worker: usize,
    fail_measure: bool,
    hold: Duration,
}

impl Renderer for ProbeRenderer {
    type Visual = ();

    fn build(&mut self, card: &Card, images: &dyn ImageResolver) -> Result<()> {
        assert_eq!(current_worker(), Some(self.worker));
        self.probe.builds.fetch_add(1, Ordering::SeqCst);
        if !self.probe.busy.lock().unwrap().insert(self.worker) {
            self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.probe.events.lock().unwrap().push((self.worker, "start"));
        self.probe
            .settled_at_build
            .lock()
            .unwrap()
            .push(self.probe.fetch_settled.load(Ordering::SeqCst));

        // Resolve every reference, twice for shared URLs, like a real renderer would
        let mut refs = Vec::new();
        if let Some(bg) = &card.background_image {
            refs.push(bg.clone());
        }
        refs.extend(collect_image_urls(card));
        for url in refs {
            let payload = images.resolve(&url).map(|mut c| {
                let mut buf = Vec::new();
                c.read_to_end(&mut buf).unwrap();
                buf
            });
            self.probe.resolved.lock().unwrap().push((url, payload));
        }
        std::thread::sleep(self.hold);
        Ok(())
    }

    fn measure(&mut self, _visual: &(), width: u32, _max_height: u32) -> Result<Size> {
        if self.fail_measure {
            return Err(Error::RenderError("measure blew up".into()));
        }
        Ok(Size { width, height: 10 })
    }

    fn rasterize(&mut self, _visual: &(), width: u32, height: u32) -> Result<Bitmap> {
        self.probe.events.lock().unwrap().push((self.worker, "end"));
        self.probe.busy.lock().unwrap().remove(&self.worker);
        Ok(Bitmap {
            image: RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])),
        })
    }
}

struct Harness {
    renderer: CardRenderer<ProbeRenderer>,
    fetcher: Arc<FakeFetcher>,
    probe: Probe,
}

fn harness(workers: usize, fetcher: FakeFetcher, fail_measure: bool, hold: Duration) -> Harness {
    let probe = Probe {
        fetch_settled: fetcher.settled.clone(),
        ..Default::default()
    };
    let worker_probe = probe.clone();
    let executor = AffinityExecutor::new(workers, move |idx| {
        Ok(ProbeRenderer {
            probe: worker_probe.clone(),
            worker: idx,
            fail_measure,
            hold,
        })
    })
    .unwrap();
    let fetcher = Arc::new(fetcher);
    let prefetcher = Prefetcher::new(
        fetcher.clone(),
        PrefetchOptions {
            timeout: Some(Duration::from_secs(5)),
            concurrency: None,
            retries: 0,
            retry_backoff: Duration::from_millis(1),
        },
    );
    Harness {
        renderer: CardRenderer::new(Arc::new(executor), prefetcher, RenderOptions::default()),
        fetcher,
        probe,
    }
}

fn decode_png(stream: std::io::Cursor<Vec<u8>>) -> RgbaImage {
    assert_eq!(stream.position(), 0);
    image::load_from_memory(stream.get_ref()).expect("valid png").to_rgba8()
}

#[tokio::test]
async fn scenario_a_no_images_means_no_fetches() {
    let h = harness(2, FakeFetcher::default(), false, Duration::ZERO);
    let card = Card::from_json(r#"{"body": [{"type": "TextBlock", "text": "plain"}]}"#).unwrap();

    let img = decode_png(h.renderer.render_async(card, 480).await.unwrap());
    assert_eq!(img.dimensions(), (480, 10));
    assert_eq!(h.fetcher.total_calls(), 0);
}

#[tokio::test]
async fn scenario_b_shared_url_fetched_once() {
    let h = harness(2, FakeFetcher::default(), false, Duration::ZERO);
    let card = Card::from_json(
        r#"{"backgroundImage": "a.png", "body": [
            {"type": "Image", "url": "a.png"},
            {"type": "Container", "items": [{"type": "Image", "url": "a.png"}]}
        ]}"#,
    )
    .unwrap();

    h.renderer.render_async(card, 300).await.unwrap();
    assert_eq!(h.fetcher.calls_for("a.png"), 1);

    let resolved = h.probe.resolved.lock().unwrap();
    assert_eq!(resolved.len(), 2);
    let expected = png_bytes().to_vec();
    for (url, payload) in resolved.iter() {
        assert_eq!(url, "a.png");
        assert_eq!(payload.as_deref(), Some(expected.as_slice()));
    }
}

#[tokio::test]
async fn scenario_c_unreachable_image_still_renders() {
    let fetcher = FakeFetcher {
        failing: ["https://down.example/x.png".to_string()].into_iter().collect(),
        ..Default::default()
    };
    let h = harness(1, fetcher, false, Duration::ZERO);
    let card = Card::from_json(
        r#"{"body": [
            {"type": "Image", "url": "https://down.example/x.png"},
            {"type": "Image", "url": "https://up.example/y.png"}
        ]}"#,
    )
    .unwrap();

    let img = decode_png(h.renderer.render_async(card, 200).await.unwrap());
    assert_eq!(img.width(), 200);
    assert_eq!(h.probe.builds.load(Ordering::SeqCst), 1);

    let resolved = h.probe.resolved.lock().unwrap();
    let lookup: HashMap<_, _> = resolved.iter().cloned().collect();
    assert_eq!(lookup["https://down.example/x.png"], None);
    assert!(lookup["https://up.example/y.png"].is_some());
}

#[tokio::test]
async fn scenario_d_measure_failure_fails_the_call() {
    let h = harness(1, FakeFetcher::default(), true, Duration::ZERO);
    let err = h.renderer.render_async(Card::default(), 100).await.unwrap_err();
    match err {
        Error::RenderError(msg) => assert!(msg.contains("measure blew up")),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn render_waits_for_every_fetch_to_settle() {
    let fetcher = FakeFetcher {
        delays: [("slow.png".to_string(), Duration::from_millis(150))].into_iter().collect(),
        failing: ["broken.png".to_string()].into_iter().collect(),
        ..Default::default()
    };
    let h = harness(1, fetcher, false, Duration::ZERO);
    let card = Card::from_json(
        r#"{"body": [
            {"type": "Image", "url": "fast.png"},
            {"type": "Image", "url": "slow.png"},
            {"type": "Image", "url": "broken.png"}
        ]}"#,
    )
    .unwrap();

    h.renderer.render_async(card, 100).await.unwrap();
    assert_eq!(*h.probe.settled_at_build.lock().unwrap(), vec![3]);
}

#[tokio::test]
async fn concurrent_renders_serialize_on_one_worker() {
    let h = harness(1, FakeFetcher::default(), false, Duration::from_millis(40));
    let card = Arc::new(Card::default());

    let (a, b, c) = tokio::join!(
        h.renderer.render_async(card.clone(), 64),
        h.renderer.render_async(card.clone(), 64),
        h.renderer.render_async(card.clone(), 64),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(h.probe.overlaps.load(Ordering::SeqCst), 0);
    let events = h.probe.events.lock().unwrap();
    let kinds: Vec<_> = events.iter().map(|(_, k)| *k).collect();
    assert_eq!(kinds, vec!["start", "end", "start", "end", "start", "end"]);
}

#[tokio::test]
async fn units_never_interleave_per_worker() {
    let h = harness(3, FakeFetcher::default(), false, Duration::from_millis(10));
    let card = Arc::new(Card::default());
    let calls: Vec<_> = (0..12).map(|_| h.renderer.render_async(card.clone(), 32)).collect();
    for res in futures::future::join_all(calls).await {
        res.unwrap();
    }

    assert_eq!(h.probe.overlaps.load(Ordering::SeqCst), 0);
    let events = h.probe.events.lock().unwrap();
    for worker in 0..3 {
        let per_worker: Vec<_> = events.iter().filter(|(w, _)| *w == worker).map(|(_, k)| *k).collect();
        for pair in per_worker.chunks(2) {
            assert_eq!(pair, ["start", "end"]);
        }
    }
}

#[tokio::test]
async fn canceled_render_never_reaches_renderer() {
    let h = harness(1, FakeFetcher::default(), false, Duration::ZERO);
    let token = CancelToken::new();
    token.cancel();
    let err = h
        .renderer
        .render_async_with_cancel(Card::default(), 100, token)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Canceled));
    assert_eq!(h.probe.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn each_call_gets_a_fresh_cache() {
    let h = harness(1, FakeFetcher::default(), false, Duration::ZERO);
    let card = Arc::new(Card::from_json(r#"{"body": [{"type": "Image", "url": "a.png"}]}"#).unwrap());
    h.renderer.render_async(card.clone(), 50).await.unwrap();
    h.renderer.render_async(card, 50).await.unwrap();
    assert_eq!(h.fetcher.calls_for("a.png"), 2);
}

#[tokio::test]
async fn data_uri_images_need_no_fetch() {
    let h = harness(1, FakeFetcher::default(), false, Duration::ZERO);
    let card = Card::from_json(r#"{"body": [{"type": "Image", "url": "data:image/png;base64,aGk="}]}"#).unwrap();
    h.renderer.render_async(card, 50).await.unwrap();
    assert_eq!(h.fetcher.total_calls(), 0);
    let resolved = h.probe.resolved.lock().unwrap();
    assert_eq!(resolved[0].1.as_deref(), Some(&b"hi"[..]));
}

#[tokio::test]
async fn prefetch_timeout_is_a_soft_failure() {
    let fetcher = FakeFetcher {
        delays: [("hang.png".to_string(), Duration::from_secs(10))].into_iter().collect(),
        ..Default::default()
    };
    let fetcher = Arc::new(fetcher);
    let prefetcher = Prefetcher::new(
        fetcher.clone(),
        PrefetchOptions {
            timeout: Some(Duration::from_millis(50)),
            concurrency: None,
            retries: 0,
            retry_backoff: Duration::from_millis(1),
        },
    );
    let card = Card::from_json(
        r#"{"body": [{"type": "Image", "url": "hang.png"}, {"type": "Image", "url": "ok.png"}]}"#,
    )
    .unwrap();

    let cache = prefetcher.prefetch(&card).await;
    assert!(!cache.contains("hang.png"));
    assert!(cache.contains("ok.png"));
}
