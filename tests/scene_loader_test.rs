use std::{io::Cursor, path::Path, rc::Rc};

use base64::Engine as _;
use panel_ngin::{
    data_structures::material::{MapSlot, UvTransform},
    error::ViewerError,
    resources::{
        Loads, load_binary, resolve_url,
        scene::{AssetLoader, load_scene_source},
    },
};
use serde_json::json;

const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

fn png() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 30, 30, 255]))
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Two nodes: `Upper` with two primitives sharing a textured material, `Toe` with
/// one untextured primitive. All primitives reuse one triangle.
fn document(buffer_uri: &str, image_uri: &str) -> String {
    json!({
        "asset": { "version": "2.0" },
        "extensionsUsed": ["KHR_texture_transform"],
        "scene": 0,
        "scenes": [{ "nodes": [0, 1] }],
        "nodes": [
            { "name": "Upper", "mesh": 0 },
            { "name": "Toe", "mesh": 1 }
        ],
        "meshes": [
            {
                "primitives": [
                    { "attributes": { "POSITION": 0 }, "material": 0 },
                    { "attributes": { "POSITION": 0 }, "material": 0 }
                ]
            },
            {
                "primitives": [
                    { "attributes": { "POSITION": 0 }, "material": 1 }
                ]
            }
        ],
        "materials": [
            {
                "name": "Leather",
                "pbrMetallicRoughness": {
                    "baseColorTexture": {
                        "index": 0,
                        "extensions": {
                            "KHR_texture_transform": {
                                "offset": [0.5, 0.0],
                                "scale": [2.0, 2.0]
                            }
                        }
                    },
                    "roughnessFactor": 0.7
                }
            },
            { "name": "Lining" }
        ],
        "textures": [{ "source": 0 }],
        "images": [{ "uri": image_uri }],
        "accessors": [{
            "bufferView": 0,
            "componentType": 5126,
            "count": 3,
            "type": "VEC3",
            "min": [0.0, 0.0, 0.0],
            "max": [1.0, 1.0, 0.0]
        }],
        "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
        "buffers": [{ "uri": buffer_uri, "byteLength": 36 }]
    })
    .to_string()
}

/// `models/shoe.gltf` with its buffer next to it and its colour map in a sibling
/// directory under a name that needs percent-encoding.
fn write_shoe(root: &Path) {
    std::fs::create_dir_all(root.join("models")).expect("mkdir");
    std::fs::create_dir_all(root.join("textures")).expect("mkdir");
    std::fs::write(
        root.join("models/shoe.gltf"),
        document("shoe.bin", "../textures/Leather%20Red.png"),
    )
    .expect("write gltf");
    std::fs::write(
        root.join("models/shoe.bin"),
        bytemuck::cast_slice::<f32, u8>(&TRIANGLE),
    )
    .expect("write bin");
    std::fs::write(root.join("textures/Leather Red.png"), png()).expect("write png");
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().expect("tokio runtime")
}

#[test]
fn scene_with_external_buffer_and_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_shoe(dir.path());
    let root = dir.path().to_string_lossy().to_string();

    let source = runtime()
        .block_on(load_scene_source("models/shoe.gltf".to_string(), root))
        .expect("scene loads");

    let names: Vec<_> = source.panels.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["Upper_0", "Upper_1", "Toe"]);
    assert_eq!(source.panels[0].geometry.positions.len(), 3);
    assert_eq!(source.panels[0].geometry.positions[1], [1.0, 0.0, 0.0]);

    let image = source.images[0].as_ref().expect("image decoded");
    assert!(image.key.ends_with("/textures/Leather%20Red.png"), "{}", image.key);
    assert_eq!((image.image.width(), image.image.height()), (2, 2));
}

#[test]
fn texture_transform_reaches_the_material() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_shoe(dir.path());
    let root = dir.path().to_string_lossy().to_string();

    let source = runtime()
        .block_on(load_scene_source("models/shoe.gltf".to_string(), root))
        .expect("scene loads");

    let leather = &source.panels[0].material;
    assert_eq!(leather.name, "Leather");
    assert_eq!(leather.roughness, 0.7);
    let color = leather.maps[MapSlot::Color.index()].expect("colour map");
    assert_eq!(color.image, 0);
    assert_eq!(color.transform, UvTransform::from_khr([0.5, 0.0], 0.0, [2.0, 2.0]));
    assert!(leather.maps[MapSlot::Normal.index()].is_none());
    assert!(leather.maps[MapSlot::Roughness.index()].is_none());

    let lining = &source.panels[2].material;
    assert_eq!(lining.name, "Lining");
    assert_eq!(lining.maps, [None, None, None]);
}

#[test]
fn data_uris_are_decoded_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gltf = document(
        &data_url("application/octet-stream", bytemuck::cast_slice(&TRIANGLE)),
        &data_url("image/png", &png()),
    );
    std::fs::write(dir.path().join("inline.gltf"), gltf).expect("write gltf");
    let root = dir.path().to_string_lossy().to_string();

    let source = runtime()
        .block_on(load_scene_source("inline.gltf".to_string(), root))
        .expect("scene loads");

    assert_eq!(source.panels.len(), 3);
    assert_eq!(source.panels[2].geometry.positions[2], [0.0, 1.0, 0.0]);
    let image = source.images[0].as_ref().expect("image decoded");
    assert_eq!(image.key, "inline.gltf#image0");
}

#[test]
fn missing_image_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_shoe(dir.path());
    std::fs::remove_file(dir.path().join("textures/Leather Red.png")).expect("rm");
    let root = dir.path().to_string_lossy().to_string();

    let source = runtime()
        .block_on(load_scene_source("models/shoe.gltf".to_string(), root))
        .expect("scene loads");

    assert_eq!(source.panels.len(), 3);
    assert!(source.images[0].is_none());
}

#[test]
fn missing_buffer_fails_the_scene() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_shoe(dir.path());
    std::fs::remove_file(dir.path().join("models/shoe.bin")).expect("rm");
    let root = dir.path().to_string_lossy().to_string();

    let result = runtime().block_on(load_scene_source("models/shoe.gltf".to_string(), root));
    assert!(result.is_err());
}

#[test]
fn loads_of_one_url_are_shared() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_shoe(dir.path());
    let runtime = runtime();
    let loader = AssetLoader::new(Loads::new(
        dir.path().to_string_lossy(),
        runtime.handle().clone(),
    ));

    let first = loader.load("models/shoe.gltf");
    let second = loader.load("models/shoe.gltf");
    assert!(loader.is_cached("models/shoe.gltf"));

    let first = runtime.block_on(first).expect("scene loads");
    let second = runtime.block_on(second).expect("scene loads");
    assert!(Rc::ptr_eq(&first, &second));

    // later loads get the finished scene
    let third = runtime.block_on(loader.load("models/shoe.gltf")).expect("scene loads");
    assert!(Rc::ptr_eq(&first, &third));
}

#[test]
fn failed_load_is_forgotten() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = runtime();
    let loader = AssetLoader::new(Loads::new(
        dir.path().to_string_lossy(),
        runtime.handle().clone(),
    ));

    let result = runtime.block_on(loader.load("models/shoe.gltf"));
    assert!(matches!(
        result,
        Err(ViewerError::AssetLoad { ref url, .. }) if url == "models/shoe.gltf"
    ));
    assert!(!loader.is_cached("models/shoe.gltf"));

    // the file shows up; the next load starts over
    write_shoe(dir.path());
    let source = runtime
        .block_on(loader.load("models/shoe.gltf"))
        .expect("scene loads");
    assert_eq!(source.panels.len(), 3);
}

#[test]
fn names_resolve_under_the_asset_root() {
    let cwd = std::env::current_dir().expect("cwd");
    let url = resolve_url("models/shoe.gltf", "assets").expect("resolves");
    assert_eq!(url.scheme(), "file");

    let image = url.join("../tex/Leather%20Red.png").expect("joins");
    assert_eq!(
        image.to_file_path().expect("local path"),
        cwd.join("assets").join("tex").join("Leather Red.png")
    );
}

#[test]
fn urls_resolve_as_themselves() {
    let remote = resolve_url("https://cdn.example.com/m/shoe.gltf?v=1/2", "assets").expect("resolves");
    assert_eq!(
        remote.join("tex.png").expect("joins").as_str(),
        "https://cdn.example.com/m/tex.png"
    );

    let inline = resolve_url("data:application/octet-stream;base64,AAAA", "assets").expect("resolves");
    assert_eq!(inline.scheme(), "data");
}

#[test]
fn binary_loads_decode_names_and_data_urls() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("catalog")).expect("mkdir");
    std::fs::write(dir.path().join("catalog/Red Suede.png"), b"suede").expect("write");
    let root = dir.path().to_string_lossy().to_string();
    let runtime = runtime();

    let bytes = runtime
        .block_on(load_binary("catalog/Red%20Suede.png", &root))
        .expect("file loads");
    assert_eq!(bytes, b"suede");

    let bytes = runtime
        .block_on(load_binary("data:application/octet-stream;base64,AQID", &root))
        .expect("data url loads");
    assert_eq!(bytes, [1, 2, 3]);

    assert!(runtime.block_on(load_binary("data:text/plain,hello", &root)).is_err());
    assert!(runtime.block_on(load_binary("catalog/missing.png", &root)).is_err());
}
