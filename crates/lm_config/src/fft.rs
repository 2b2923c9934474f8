// crates/lm_config/src/fft.rs

//! 分布式 FFT 配置

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 分布式 FFT 配置
///
/// `mesh` 是全局网格尺寸，`mesh_off` 是以网格单位计的全局偏移
/// （电荷指派网格可能相对盒子有分数偏移）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FftConfig {
    /// 全局网格尺寸
    pub mesh: [usize; 3],
    /// 网格偏移（网格单位）
    #[serde(default)]
    pub mesh_off: [f64; 3],
    /// 是否读写 wisdom 文件加速平面规划
    #[serde(default = "default_use_wisdom")]
    pub use_wisdom: bool,
}

fn default_use_wisdom() -> bool {
    true
}

impl FftConfig {
    /// 创建无偏移配置
    pub fn new(mesh: [usize; 3]) -> Self {
        Self {
            mesh,
            mesh_off: [0.0; 3],
            use_wisdom: true,
        }
    }

    /// 校验
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (d, &m) in self.mesh.iter().enumerate() {
            if m == 0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("mesh[{}]", d),
                    value: "0".into(),
                    reason: "网格尺寸必须为正".into(),
                });
            }
        }
        Ok(())
    }
}
