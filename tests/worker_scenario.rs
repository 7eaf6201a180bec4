use std::io::Cursor;
use std::sync::Arc;
use std::thread;

use image::{ImageFormat, Rgb, RgbImage};
use placeherd::auth::AdminAuth;
use placeherd::coordinator::{Coordinator, CoordinatorOptions};
use placeherd::dispatch::Dispatcher;
use placeherd::protocol::{Request, Response};
use placeherd::source::{DocumentSource, RegionSource, TemplateSource};
use serde_json::{Value, json};

const TEMPLATE: &str = r#"{
    "structures": [
        { "weight": 10, "pixels": [ { "x": 5, "y": 5, "color": 2, "weight": 1 } ] }
    ],
    "versions": { "bot-v2": 3 }
}"#;

fn coordinator(admin: AdminAuth) -> Arc<Coordinator> {
    let options = CoordinatorOptions {
        width: 2000,
        height: 2000,
        seed: Some(11),
        ..CoordinatorOptions::default()
    };
    Arc::new(Coordinator::new(&options, admin))
}

fn send(dispatcher: &Dispatcher, frame: &str) -> Option<Value> {
    dispatcher
        .handle(Request::parse(frame).unwrap())
        .map(|reply| serde_json::from_str(&reply.to_text()).unwrap())
}

#[test]
fn request_pixel_until_canvas_matches_template() {
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("pixel.json");
    std::fs::write(&template_path, TEMPLATE).unwrap();

    let coordinator = coordinator(AdminAuth::disabled());
    let source = DocumentSource::new(
        template_path.to_str().unwrap(),
        std::time::Duration::from_secs(1),
    );
    coordinator.refresh_template(&source, true).unwrap();
    assert_eq!(coordinator.reconcile().mismatches, 1);

    let workers: Vec<Dispatcher> = (0..2)
        .map(|_| Dispatcher::new(Arc::clone(&coordinator), None))
        .collect();
    let replies: Vec<Option<Value>> = thread::scope(|scope| {
        let handles: Vec<_> = workers
            .iter()
            .map(|w| scope.spawn(move || send(w, r#"{"operation":"request-pixel","user":"u"}"#)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let datas: Vec<&Value> = replies.iter().map(|r| &r.as_ref().unwrap()["data"]).collect();
    assert!(datas.contains(&&json!({"x": 5, "y": 5, "color": 2})));
    assert!(datas.contains(&&json!({})));

    let mut png = Cursor::new(Vec::new());
    RgbImage::from_pixel(1, 1, Rgb([0xFF, 0x45, 0x00]))
        .write_to(&mut png, ImageFormat::Png)
        .unwrap();
    let region_path = dir.path().join("region.png");
    std::fs::write(&region_path, png.into_inner()).unwrap();
    let canvas = RegionSource::new(
        [(region_path.display().to_string(), 5, 5)],
        std::time::Duration::from_secs(1),
    );
    for region in placeherd::source::CanvasSource::fetch_regions(&canvas, None) {
        let region = region.unwrap();
        coordinator.apply_region(&region.decode().unwrap(), region.offset_x, region.offset_y);
    }

    assert_eq!(coordinator.reconcile().mismatches, 0);
    assert_eq!(
        send(&workers[0], r#"{"operation":"request-pixel","user":"u"}"#).unwrap()["data"],
        json!({})
    );
    assert!(source.describe().ends_with("pixel.json"));
}

#[test]
fn admin_sees_total_capacity_of_live_workers() {
    let digest = AdminAuth::digest("salt", "admin");
    let coordinator = coordinator(AdminAuth::new("salt", Some(&digest)));
    let first = Dispatcher::new(Arc::clone(&coordinator), None);
    let second = Dispatcher::new(Arc::clone(&coordinator), None);

    send(&first, r#"{"operation":"handshake","data":{"platform":"js","version":1,"useraccounts":4}}"#);
    send(&second, r#"{"operation":"handshake","data":{"platform":"js","version":1,"useraccounts":6}}"#);

    assert_eq!(
        send(&first, r#"{"operation":"get-botcount","pw":"admin"}"#),
        Some(json!({"amount": 10}))
    );
    assert_eq!(send(&first, r#"{"operation":"get-botcount","pw":"wrong"}"#), None);

    drop(second);
    assert_eq!(
        send(&first, r#"{"operation":"get-botcount","pw":"admin"}"#),
        Some(json!({"amount": 4}))
    );
}

#[test]
fn outdated_worker_is_told_to_update() {
    let coordinator = coordinator(AdminAuth::disabled());
    coordinator
        .install_template(placeherd::template::TargetTemplate::parse(TEMPLATE, 2000, 2000).unwrap());
    let worker = Dispatcher::new(Arc::clone(&coordinator), None);

    let reply = worker.handle(
        Request::parse(r#"{"operation":"handshake","data":{"platform":"bot-v2","version":1}}"#)
            .unwrap(),
    );

    assert_eq!(reply, Some(Response::NotifyUpdate { version: 3 }));
    assert_eq!(send(&worker, r#"{"operation":"ping"}"#), Some(json!({"pong": true})));
}
