//! Scene loading: glTF/GLB into a CPU-side [`SceneSource`].
//!
//! The decode produces plain data only (no GPU objects, no `Rc`) so that it can
//! run on a worker. The viewer turns it into a
//! [`SceneAsset`](crate::data_structures::scene::SceneAsset) on the render thread.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use anyhow::{Context as _, bail};
use cgmath::{InnerSpace, Matrix4, SquareMatrix, Vector2, Vector3};
use futures::{
    FutureExt,
    future::{LocalBoxFuture, Shared},
};
use image::{DynamicImage, ImageFormat};

use crate::{
    data_structures::{
        material::{MapSlot, UvTransform},
        scene::PanelGeometry,
    },
    error::ViewerError,
    resources::{Loads, fetch, resolve_url},
};

/// An image referenced by the scene, decoded but not uploaded.
pub struct ImageSource {
    /// The resolved image URL, or `<scene url>#image<i>` for images embedded in the
    /// file or in a `data:` URI.
    pub key: String,
    pub image: DynamicImage,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapSource {
    /// Index into [`SceneSource::images`].
    pub image: usize,
    pub transform: UvTransform,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialSource {
    pub name: String,
    pub base_color: [f32; 4],
    pub roughness: f32,
    pub metalness: f32,
    pub maps: [Option<MapSource>; 3],
}

impl Default for MaterialSource {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: [1.0; 4],
            roughness: 1.0,
            metalness: 1.0,
            maps: [None, None, None],
        }
    }
}

pub struct PanelSource {
    pub name: String,
    pub geometry: PanelGeometry,
    pub material: MaterialSource,
}

pub struct SceneSource {
    pub url: String,
    pub panels: Vec<PanelSource>,
    /// Same order as the images of the file. `None` for images that failed to load.
    pub images: Vec<Option<ImageSource>>,
}

pub type SceneLoad = Shared<LocalBoxFuture<'static, Result<Rc<SceneSource>, ViewerError>>>;

/// Fetches and decodes scene files, one load per URL.
///
/// Concurrent and repeated loads of a URL share one future. Failed loads are
/// forgotten so that the next call starts over.
pub struct AssetLoader {
    loads: Loads,
    entries: Rc<RefCell<HashMap<String, SceneLoad>>>,
}

impl AssetLoader {
    pub fn new(loads: Loads) -> Self {
        Self {
            loads,
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn load(&self, url: &str) -> SceneLoad {
        if let Some(load) = self.entries.borrow().get(url) {
            return load.clone();
        }

        log::info!("Loading scene {url}");
        let source = self
            .loads
            .spawn(load_scene_source(url.to_string(), self.loads.asset_root().to_string()));
        let entries = Rc::downgrade(&self.entries);
        let key = url.to_string();
        let load = async move {
            match source.await {
                Ok(source) => Ok(Rc::new(source)),
                Err(err) => {
                    let err = ViewerError::asset_load(&key, &err);
                    if let Some(entries) = entries.upgrade() {
                        entries.borrow_mut().remove(&key);
                    }
                    Err(err)
                }
            }
        }
        .boxed_local()
        .shared();

        self.entries.borrow_mut().insert(url.to_string(), load.clone());
        load
    }

    pub fn loads(&self) -> &Loads {
        &self.loads
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.entries.borrow().contains_key(url)
    }
}

/// Fetch `url` with everything it references and decode it.
///
/// Buffer and image URIs are resolved against the URL of the scene file; `data:`
/// URIs are decoded in place.
pub async fn load_scene_source(url: String, asset_root: String) -> anyhow::Result<SceneSource> {
    let base = resolve_url(&url, &asset_root)?;
    let bytes = fetch(&base).await?;
    let gltf = gltf::Gltf::from_slice(&bytes).with_context(|| format!("{url} is not glTF"))?;

    let mut buffers = Vec::new();
    for buffer in gltf.buffers() {
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => gltf
                .blob
                .as_deref()
                .context("binary chunk missing")?
                .to_vec(),
            gltf::buffer::Source::Uri(uri) => {
                let resolved = base
                    .join(uri)
                    .with_context(|| format!("invalid buffer URI {uri}"))?;
                fetch(&resolved)
                    .await
                    .with_context(|| format!("buffer {}", buffer.index()))?
            }
        };
        buffers.push(data);
    }

    let mut images = Vec::new();
    for image in gltf.images() {
        let embedded = format!("{url}#image{}", image.index());
        let decoded = match image.source() {
            gltf::image::Source::View { view, mime_type } => {
                let start = view.offset();
                let data = buffers
                    .get(view.buffer().index())
                    .and_then(|buffer| buffer.get(start..start + view.length()))
                    .context("image view out of bounds")?;
                decode_image(data, Some(mime_type)).map(|image_data| (embedded, image_data))
            }
            gltf::image::Source::Uri { uri, mime_type } => match base.join(uri) {
                Ok(resolved) => match fetch(&resolved).await {
                    Ok(data) => decode_image(&data, mime_type).map(|image_data| {
                        let key = if resolved.scheme() == "data" {
                            embedded
                        } else {
                            resolved.to_string()
                        };
                        (key, image_data)
                    }),
                    Err(err) => Err(err),
                },
                Err(err) => Err(err.into()),
            },
        };
        images.push(match decoded {
            Ok((key, image)) => Some(ImageSource { key, image }),
            Err(err) => {
                log::warn!("Skipping image {} of {url}: {err:#}", image.index());
                None
            }
        });
    }

    let scene = gltf
        .default_scene()
        .or_else(|| gltf.scenes().next())
        .context("file contains no scene")?;
    let mut panels = Vec::new();
    for node in scene.nodes() {
        collect_panels(node, Matrix4::identity(), &buffers, &mut panels);
    }
    if panels.is_empty() {
        bail!("scene contains no meshes");
    }

    Ok(SceneSource { url, panels, images })
}

fn decode_image(data: &[u8], mime_type: Option<&str>) -> anyhow::Result<DynamicImage> {
    let image = match mime_type.and_then(ImageFormat::from_mime_type) {
        Some(format) => image::load_from_memory_with_format(data, format)?,
        None => image::load_from_memory(data)?,
    };
    Ok(image)
}

fn collect_panels(
    node: gltf::Node,
    parent: Matrix4<f32>,
    buffers: &[Vec<u8>],
    panels: &mut Vec<PanelSource>,
) {
    let world = parent * Matrix4::from(node.transform().matrix());

    if let Some(mesh) = node.mesh() {
        let base = node
            .name()
            .or_else(|| mesh.name())
            .map(str::to_string)
            .unwrap_or_else(|| format!("panel_{}", node.index()));
        let count = mesh.primitives().count();
        for (idx, primitive) in mesh.primitives().enumerate() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!("Skipping non-triangle primitive {idx} of {base}");
                continue;
            }
            let name = if count > 1 {
                format!("{base}_{idx}")
            } else {
                base.clone()
            };
            let Some(geometry) = read_geometry(&primitive, buffers, world) else {
                log::warn!("Primitive {idx} of {base} has no positions");
                continue;
            };
            panels.push(PanelSource {
                name,
                geometry,
                material: read_material(&primitive.material()),
            });
        }
    }

    for child in node.children() {
        collect_panels(child, world, buffers, panels);
    }
}

fn read_geometry(
    primitive: &gltf::Primitive,
    buffers: &[Vec<u8>],
    world: Matrix4<f32>,
) -> Option<PanelGeometry> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));

    let positions: Vec<[f32; 3]> = reader.read_positions()?.collect();
    let vertex_count = positions.len();
    let mut geometry = PanelGeometry::from_positions(positions);
    geometry.world = world;

    geometry.normals = reader
        .read_normals()
        .map(|normals| normals.collect())
        .unwrap_or_else(|| vec![[0.0, 1.0, 0.0]; vertex_count]);
    geometry.tex_coords = reader
        .read_tex_coords(0)
        .map(|coords| coords.into_f32().collect())
        .unwrap_or_else(|| vec![[0.0, 0.0]; vertex_count]);
    geometry.indices = reader
        .read_indices()
        .map(|indices| indices.into_u32().collect())
        .unwrap_or_else(|| (0..vertex_count as u32).collect());
    geometry.tangents = match reader.read_tangents() {
        Some(tangents) => tangents.collect(),
        None => compute_tangents(&geometry),
    };
    Some(geometry)
}

/// Per-vertex tangents averaged over the adjacent triangles. `w` is the bitangent sign.
pub(crate) fn compute_tangents(geometry: &PanelGeometry) -> Vec<[f32; 4]> {
    let count = geometry.positions.len();
    let mut tangents = vec![Vector3::new(0.0f32, 0.0, 0.0); count];
    for tri in geometry.indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if a >= count || b >= count || c >= count {
            continue;
        }
        let pos = |i: usize| Vector3::from(geometry.positions[i]);
        let uv = |i: usize| Vector2::from(geometry.tex_coords[i]);

        let delta_pos1 = pos(b) - pos(a);
        let delta_pos2 = pos(c) - pos(a);
        let delta_uv1 = uv(b) - uv(a);
        let delta_uv2 = uv(c) - uv(a);

        let det = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
        if det.abs() < f32::EPSILON {
            continue;
        }
        let tangent = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) / det;
        for i in [a, b, c] {
            tangents[i] += tangent;
        }
    }

    tangents
        .into_iter()
        .enumerate()
        .map(|(i, t)| {
            let normal = Vector3::from(geometry.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]));
            // Gram-Schmidt against the normal
            let t = t - normal * normal.dot(t);
            if t.magnitude2() > f32::EPSILON {
                let t = t.normalize();
                [t.x, t.y, t.z, 1.0]
            } else {
                [1.0, 0.0, 0.0, 1.0]
            }
        })
        .collect()
}

fn read_material(material: &gltf::Material) -> MaterialSource {
    let pbr = material.pbr_metallic_roughness();
    let mut maps = [None, None, None];

    let color = pbr.base_color_texture().map(|info| MapSource {
        image: info.texture().source().index(),
        transform: info
            .texture_transform()
            .map(|t| UvTransform::from_khr(t.offset(), t.rotation(), t.scale()))
            .unwrap_or_default(),
    });
    // normal textures carry no transform of their own here; follow the colour map
    let follow = color.map(|map| map.transform).unwrap_or_default();
    maps[MapSlot::Color.index()] = color;
    maps[MapSlot::Normal.index()] = material.normal_texture().map(|normal| MapSource {
        image: normal.texture().source().index(),
        transform: follow,
    });
    maps[MapSlot::Roughness.index()] = pbr.metallic_roughness_texture().map(|info| MapSource {
        image: info.texture().source().index(),
        transform: info
            .texture_transform()
            .map(|t| UvTransform::from_khr(t.offset(), t.rotation(), t.scale()))
            .unwrap_or(follow),
    });

    MaterialSource {
        name: material
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| match material.index() {
                Some(idx) => format!("material_{idx}"),
                None => "default".to_string(),
            }),
        base_color: pbr.base_color_factor(),
        roughness: pbr.roughness_factor(),
        metalness: pbr.metallic_factor(),
        maps,
    }
}
