// mesh.rs — 单位球网格生成 (经纬度细分，视点位于球心，贴图画在内表面)

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct SphereMesh {
    pub positions: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl SphereMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Rejects zero segment counts and grids whose vertex or index count does
/// not fit the 32-bit index buffer.
pub fn check_segments(lat: u32, lon: u32) -> Result<(), ConfigError> {
    let vertices = (lat as u64 + 1) * (lon as u64 + 1);
    let indices = 6 * lat as u64 * lon as u64;
    if lat == 0 || lon == 0 || vertices > u32::MAX as u64 || indices > u32::MAX as u64 {
        return Err(ConfigError::InvalidSegments { lat, lon });
    }
    Ok(())
}

/// Tessellates a unit sphere into `(lat + 1) * (lon + 1)` grid vertices.
///
/// Row `i` sits at colatitude `PI * i / lat` (north pole first), column `j`
/// at longitude `2 * PI * j / lon`. Texture coordinates are plain
/// equirectangular `(j / lon, i / lat)`. The seam column and the pole rows are
/// kept as separate vertices; pole triangles collapse to zero area.
pub fn build_sphere(lat: u32, lon: u32) -> Result<SphereMesh, ConfigError> {
    check_segments(lat, lon)?;

    let (lat, lon) = (lat as usize, lon as usize);
    let mut positions = Vec::with_capacity((lat + 1) * (lon + 1));
    let mut uvs = Vec::with_capacity((lat + 1) * (lon + 1));
    let mut indices = Vec::with_capacity(6 * lat * lon);

    for i in 0..=lat {
        let theta = std::f32::consts::PI * (i as f32) / (lat as f32);
        let y = theta.cos();
        let sin_t = theta.sin();

        for j in 0..=lon {
            let phi = 2.0 * std::f32::consts::PI * (j as f32) / (lon as f32);

            let x = phi.cos() * sin_t;
            let z = phi.sin() * sin_t;

            positions.push([x, y, z]);
            uvs.push([(j as f32) / (lon as f32), (i as f32) / (lat as f32)]);
        }
    }

    let stride = (lon + 1) as u32;
    for i in 0..lat {
        for j in 0..lon {
            let a = i as u32 * stride + j as u32;
            let b = a + stride;

            indices.extend_from_slice(&[
                a, b, a + 1,
                a + 1, b, b + 1,
            ]);
        }
    }

    Ok(SphereMesh {
        positions,
        uvs,
        indices,
    })
}
