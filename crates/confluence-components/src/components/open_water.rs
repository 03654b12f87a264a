//! Open water component
//!
//! A linear-reservoir river channel: discharge drains the channel store
//! over a characteristic residence time, runoff from the subsurface fills
//! it, and evaporation over open water empties it. The store never goes
//! negative.

use confluence_core::component::{
    Category, Component, ComponentDefinition, FinaliseContext, InitialiseContext, InwardSpec,
    OutputSpec, OutwardSpec, ParameterSpec, RunContext, RunOutput, StateSpec, TransferMethod,
};
use confluence_core::errors::ConfluenceResult;
use ndarray::Ix2;

/// Linear-reservoir routing of channel water.
///
/// State: `river_channel`, water held in the channel (kg m-2). Output:
/// `discharge` (kg m-2 s-1).
#[derive(Debug, Default)]
pub struct OpenWaterBucket;

impl Component for OpenWaterBucket {
    fn definition(&self) -> ComponentDefinition {
        let mut definition = ComponentDefinition::new(Category::OpenWater);
        definition.inwards = vec![
            InwardSpec::new(
                "runoff",
                "kg m-2 s-1",
                Category::SubSurface,
                TransferMethod::Mean,
            ),
            InwardSpec::new(
                "evaporation_openwater",
                "kg m-2 s-1",
                Category::SurfaceLayer,
                TransferMethod::Mean,
            ),
        ];
        definition.outwards = vec![OutwardSpec::new(
            "water_level",
            "kg m-2",
            &[Category::Ocean],
            TransferMethod::Mean,
        )];
        definition.parameters =
            vec![ParameterSpec::new("residence_time", "s").with_valid_range(1.0, 1.0e9)];
        definition.states = vec![StateSpec::new("river_channel", "kg m-2")];
        definition.outputs = vec![OutputSpec::new("discharge", "kg m-2 s-1")];
        definition
    }

    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()> {
        if !ctx.initialised_states {
            ctx.states.get_mut("river_channel").fill_timestep(-1, 1.0e3);
        }
        Ok(())
    }

    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput> {
        let dt = ctx.step_seconds as f64;
        let runoff = ctx.inwards.get("runoff");
        let evaporation = ctx.inwards.get("evaporation_openwater");
        let residence_time = ctx.parameters.get("residence_time");

        let channel_before = ctx
            .states
            .get("river_channel")
            .get_timestep(-1)
            .to_owned()
            .into_dimensionality::<Ix2>()
            .expect("river channel is grid-shaped");

        let discharge = &channel_before / residence_time;
        let channel = (&channel_before + &((&(runoff - evaporation) - &discharge) * dt))
            .mapv(|v| v.max(0.0));

        ctx.states
            .get_mut("river_channel")
            .set_timestep(0, &channel.clone().into_dyn());

        let mut output = RunOutput::default();
        output.outwards.insert("water_level".to_string(), channel);
        output.outputs.insert("discharge".to_string(), discharge);
        Ok(output)
    }

    fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
        Ok(())
    }
}
